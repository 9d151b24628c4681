use std::process::ExitCode;

fn main() -> ExitCode {
    askerp_cli::run()
}
