use std::{
    env,
    io::{BufRead, Write},
    process::ExitCode,
};

use vesper::{Object, Session};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("--vm") => run_repl(Session::new_vm()),
        Some(path) => run_file(path),
        None => run_repl(Session::new()),
    }
}

fn run_file(path: &str) -> ExitCode {
    let mut session = Session::new();
    match session.load_file(path) {
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// A minimal line-based REPL; no editing, no history.
fn run_repl(mut session: Session) -> ExitCode {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("vesper> ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return ExitCode::SUCCESS,
            Ok(_) => {}
            Err(err) => {
                eprintln!("read error: {err}");
                return ExitCode::FAILURE;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        match session.eval_str(&line, "repl.vsp") {
            Ok(Object::Nil) => println!("nil"),
            Ok(value) => println!("{value}"),
            Err(err) => eprintln!("{err}"),
        }
    }
}
