//! `heatlink check`: verify reachability and credentials.

use heatlink_core::{AuthScheme, CoreError, PollingCoordinator};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn handle(coordinator: &PollingCoordinator, global: &GlobalOpts) -> Result<(), CliError> {
    let url = coordinator.config().url.clone();
    let result = coordinator.client().test_connection().await;
    let session = coordinator.client().session_snapshot().await;
    coordinator.shutdown().await;

    if !result.map_err(CoreError::from)? {
        return Err(CliError::InvalidResponse {
            message: format!("{url} answered without the test register"),
        });
    }

    let auth = match session {
        Some(s) if s.scheme == AuthScheme::Basic => "basic".to_owned(),
        Some(s) => format!("digest {}", s.algorithm),
        None => "none".to_owned(),
    };
    output::print_output(&format!("ok: {url} (auth: {auth})"), global.quiet);
    Ok(())
}
