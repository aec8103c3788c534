fn main() {
    std::process::exit(migrate_lib::run());
}
