use std::process::ExitCode;

fn main() -> ExitCode {
    campusflow_cli::run()
}
