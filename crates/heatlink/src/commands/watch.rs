//! `heatlink watch`: run the polling loop and print each update.

use heatlink_core::{ConnectionState, PollingCoordinator};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::read::Reading;

pub async fn handle(
    coordinator: &PollingCoordinator,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let mut versions = coordinator.store().subscribe();
    let mut state = coordinator.subscribe_state();
    let mut printed: u32 = 0;
    let mut shown = ConnectionState::Disconnected;

    coordinator.start().await;

    let result = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = state.changed() => {
                if changed.is_err() {
                    break Err(CliError::ShutDown);
                }
                let current = *state.borrow_and_update();
                // Every cycle passes through Connecting; only report settled states.
                if current != ConnectionState::Connecting && current != shown {
                    shown = current;
                    if !global.quiet {
                        eprintln!("state: {}", output::state_label(current, color));
                    }
                }
                if current == ConnectionState::Error && coordinator.auth_required() {
                    break Err(CliError::AuthFailed {
                        message: "the module rejected the configured credentials".into(),
                    });
                }
            }
            changed = versions.changed() => {
                if changed.is_err() {
                    break Err(CliError::ShutDown);
                }
                if let Err(e) = print_update(coordinator, global) {
                    break Err(e);
                }
                printed += 1;
                if args.count.is_some_and(|n| printed >= n) {
                    break Ok(());
                }
            }
        }
    };

    coordinator.shutdown().await;
    result
}

fn print_update(coordinator: &PollingCoordinator, global: &GlobalOpts) -> Result<(), CliError> {
    let store = coordinator.store();
    let readings: Vec<Reading> = store
        .snapshot()
        .iter()
        .filter(|s| store.in_last_cycle(s.id))
        .map(|s| Reading::from_store(store, s.id))
        .collect();

    let out = output::render_list(
        global.output,
        &readings,
        Reading::to_row,
        Reading::to_line,
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
