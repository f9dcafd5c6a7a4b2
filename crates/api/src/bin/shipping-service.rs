//! shipping-service entry point.

use std::process::ExitCode;

use api::Role;

#[tokio::main]
async fn main() -> ExitCode {
    api::server::main(Role::Shipping).await
}
