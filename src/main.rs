use clap::Parser;

fn main() {
    env_logger::init();

    let args = chat_lua_lib::console::Args::parse();
    if let Err(e) = chat_lua_lib::run(args) {
        eprintln!("[startup] {e}");
        std::process::exit(1);
    }
}
