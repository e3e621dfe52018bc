use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    aws_sso_login::cli::main(std::env::args_os().collect(), env!("CARGO_PKG_VERSION")).await
}
