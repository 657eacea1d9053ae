use luabc::{LuaVM, VmOptions};
use std::env;
use std::fs;
use std::io::Read;
use std::process;

const VERSION: &str = "luabc 0.1.0 (Lua 5.1 bytecode runtime)";

fn print_usage() {
    eprintln!("usage: luabc [options] chunk.luac");
    eprintln!("Available options are:");
    eprintln!("  -v        show version information");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and read the chunk from stdin");
}

#[derive(Default)]
struct Options {
    chunk_file: Option<String>,
    show_version: bool,
    read_stdin: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut stop_options = false;
    let mut i = 1;

    while i < args.len() {
        let arg = &args[i];
        if !stop_options && arg.starts_with('-') {
            match arg.as_str() {
                "-v" => {
                    opts.show_version = true;
                }
                "--" => {
                    stop_options = true;
                }
                "-" => {
                    opts.read_stdin = true;
                    stop_options = true;
                }
                _ => {
                    return Err(format!("unrecognized option '{}'", arg));
                }
            }
        } else {
            opts.chunk_file = Some(arg.clone());
            break;
        }
        i += 1;
    }

    Ok(opts)
}

fn fail(message: &str) -> ! {
    eprintln!("luabc: {}", message);
    process::exit(1);
}

fn main() {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("luabc: {}", message);
            print_usage();
            process::exit(1);
        }
    };

    if opts.show_version {
        println!("{}", VERSION);
        if opts.chunk_file.is_none() && !opts.read_stdin {
            return;
        }
    }

    let bytes = if opts.read_stdin {
        let mut buf = Vec::new();
        if let Err(e) = std::io::stdin().read_to_end(&mut buf) {
            fail(&format!("stdin: {}", e));
        }
        buf
    } else {
        match &opts.chunk_file {
            Some(path) => match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => fail(&format!("cannot open {}: {}", path, e)),
            },
            None => {
                print_usage();
                process::exit(1);
            }
        }
    };

    let mut vm = LuaVM::new(VmOptions::default());
    vm.open_libs();

    let chunk = match vm.load(&bytes) {
        Ok(chunk) => chunk,
        Err(e) => {
            let name = opts.chunk_file.as_deref().unwrap_or("stdin");
            fail(&format!("{}: {}", name, e));
        }
    };

    if let Err(e) = vm.execute(chunk) {
        let full = vm.into_full_error(e);
        fail(full.message());
    }
}
