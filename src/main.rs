use csopesy::shell::Shell;
use csopesy::Config;

fn print_header() {
    println!(" ------- ------- ------- ------- ------- ------- -------");
    println!("THE CSOPESY EMULATOR");
    println!(" Type 'help' for the list of commands.");
    println!(" ------- ------- ------- ------- ------- ------- -------");
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    print_header();

    let mut shell = Shell::new(Config::default());
    if let Err(e) = shell.run() {
        eprintln!("Fatal shell error: {}", e);
        std::process::exit(1);
    }
}
