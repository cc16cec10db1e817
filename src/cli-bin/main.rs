use crate::prelude::*;

pub mod prelude {
    pub use super::args::prelude::*;
}

pub mod args;
pub mod driver;

fn main() {
    env_logger::init();

    let args = match <Args as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(err) => {
            use clap::error::ErrorKind::*;

            let exit_code = match err.kind() {
                DisplayHelp |
                DisplayHelpOnMissingArgumentOrSubcommand |
                DisplayVersion => 0,
                _ => 2,
            };

            err.print().unwrap();
            std::process::exit(exit_code);
        },
    };

    if let Err(err) = driver::run(&args) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
