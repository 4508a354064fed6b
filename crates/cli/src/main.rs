use std::process::ExitCode;

fn main() -> ExitCode {
    costscope_cli::run()
}
