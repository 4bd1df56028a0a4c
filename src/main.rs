use std::io::{self, IsTerminal, Write};

use log::{debug, info};

use ember::source::BufSource;
use ember::{printer, reader, Config, LispError, Machine};

fn main() {
    env_logger::init();

    let config = Config::from_env();
    info!("starting with {:?}", config);

    let mut machine = match Machine::with_config(config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to initialise: {}", e);
            std::process::exit(1);
        }
    };

    let interactive = io::stdin().is_terminal();
    if interactive {
        println!("ember lisp");
        println!(
            "  Heap: {}/{} bytes used, Symbols: {} interned",
            machine.heap.used(),
            machine.heap.capacity(),
            machine.symbols.count()
        );
    }
    let code = repl(&mut machine, interactive);
    std::process::exit(code);
}

/// Read, evaluate and print until input ends or `exit` is called.
/// Returns the process exit status.
fn repl(machine: &mut Machine, interactive: bool) -> i32 {
    machine.set_input(Box::new(BufSource::new(io::stdin().lock())));
    loop {
        if interactive {
            print!("> ");
            let _ = io::stdout().flush();
        }
        let expr = match reader::read_input(machine) {
            Ok(Some(expr)) => expr,
            Ok(None) => {
                if interactive {
                    println!();
                }
                return 0;
            }
            Err(e) => {
                report(machine, &e);
                if matches!(e, LispError::Io(_)) {
                    return 1;
                }
                continue;
            }
        };
        let result = machine.eval_toplevel(expr).and_then(|val| {
            printer::print(machine, val, false)?;
            machine.write_str("\n")?;
            machine.flush()
        });
        match result {
            Ok(()) => {}
            Err(LispError::Exit(code)) => {
                let _ = machine.flush();
                return code;
            }
            Err(e) => report(machine, &e),
        }
    }
}

/// Errors go to the same sink as results, then the loop carries on.
fn report(machine: &mut Machine, e: &LispError) {
    debug!("{:?}", e);
    let written = machine
        .write_str(&format!("{}\n", e))
        .and_then(|()| machine.flush());
    if written.is_err() {
        eprintln!("{}", e);
    }
}
