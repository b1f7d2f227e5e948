fn main() {
    if let Err(err) = jproc_cli::run_merge_from_env() {
        jproc_cli::exit_with(err);
    }
}
