use std::process::ExitCode;

fn main() -> ExitCode {
    motorpool_cli::run()
}
