use std::{env, process};

use cobble_lang::Cobble;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("COBBLE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    let mut cobble = Cobble::new();

    match args.len() {
        n if n > 2 => {
            println!("Usage: cobble [script]");
            process::exit(64);
        }
        2 => process::exit(cobble.run_file(&args[1])),
        _ => cobble.run_prompt(),
    };
}
