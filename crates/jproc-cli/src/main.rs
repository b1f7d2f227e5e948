fn main() {
    if let Err(err) = jproc_cli::run_from_env() {
        jproc_cli::exit_with(err);
    }
}
