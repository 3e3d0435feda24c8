//! # apim-authz
//!
//! Terminal client for API Management authorization providers.

use std::process::ExitCode;

use apim_authorizations::cli::{Cli, run};
use apim_authorizations::error::ApimError;
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err)
            if err
                .downcast_ref::<ApimError>()
                .is_some_and(ApimError::is_cancellation) =>
        {
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
