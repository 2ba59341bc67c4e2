fn main() -> std::process::ExitCode {
    lingual::run()
}
