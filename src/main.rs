//! Interactive demo: a config store driven from stdin through the reactor
//!
//! Commands, one per line:
//! - `set <key> <type> <value>` (type is one of void, int, uint, long, ulong,
//!   double, pointer, blob, string; `void` deletes)
//! - `del <key>`
//! - `get <key>`
//! - `list`
//! - `reset`
//! - `quit`
//!
//! End of input stops the loop. A heartbeat timer logs reactor metrics.

use anyhow::{anyhow, bail, Context};
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd};
use std::rc::Rc;
use std::time::Duration;
use tickloop::infrastructure::logging::init_logging;
use tickloop::{
    Callback, ConfigStore, ConfigType, Descriptor, Engine, Event, Events, Reactor, SetValue,
    Settings, StopSignal, Timeout,
};
use tracing::Level;

/// State shared by the demo callbacks
struct App {
    store: RefCell<ConfigStore>,
    stop: StopSignal,
    /// Unbuffered handle on stdin
    input: File,
    /// Bytes read but not yet terminated by a newline
    partial: RefCell<Vec<u8>>,
    heartbeat: Duration,
}

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Set {
        key: &'a str,
        ty: ConfigType,
        value: &'a str,
    },
    Del(&'a str),
    Get(&'a str),
    List,
    Reset,
    Quit,
}

fn parse_command(line: &str) -> anyhow::Result<Option<Command<'_>>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();

    let command = match verb {
        "set" => {
            let (key, rest) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: set <key> <type> <value>"))?;
            let rest = rest.trim_start();
            let (ty, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let ty: ConfigType = ty.parse()?;
            if ty != ConfigType::Void && value.is_empty() {
                bail!("usage: set <key> <type> <value>");
            }
            Command::Set {
                key,
                ty,
                value: value.trim_start(),
            }
        }
        "del" | "get" if rest.is_empty() => bail!("usage: {} <key>", verb),
        "del" => Command::Del(rest),
        "get" => Command::Get(rest),
        "list" => Command::List,
        "reset" => Command::Reset,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command: {}", other),
    };
    Ok(Some(command))
}

impl App {
    fn execute(&self, line: &str) -> anyhow::Result<()> {
        let Some(command) = parse_command(line)? else {
            return Ok(());
        };
        let mut store = self.store.borrow_mut();
        match command {
            Command::Set { key, ty, value } => {
                store.set(Some(key), SetValue::parse(ty, value)?)?;
                println!("ok");
            }
            Command::Del(key) => {
                println!("{}", if store.remove(key) { "deleted" } else { "not found" });
            }
            Command::Get(key) => match store.find(Some(key)) {
                Some(entry) => println!("{} ({}) = {}", entry.key(), entry.ty(), entry.value()),
                None => println!("not found"),
            },
            Command::List => {
                let mut cursor = store.next(None);
                while let Some(entry) = cursor {
                    println!("{} ({}) = {}", entry.key(), entry.ty(), entry.value());
                    cursor = store.next(Some(entry.key()));
                }
            }
            Command::Reset => {
                store.set(None, SetValue::Void)?;
                println!("ok");
            }
            Command::Quit => self.stop.stop(),
        }
        Ok(())
    }

    /// Execute every complete line in the input buffered so far
    fn feed(&self, bytes: &[u8]) {
        self.partial.borrow_mut().extend_from_slice(bytes);
        while !self.stop.is_stopped() {
            let line: Vec<u8> = {
                let mut partial = self.partial.borrow_mut();
                match partial.iter().position(|b| *b == b'\n') {
                    Some(pos) => partial.drain(..=pos).collect(),
                    None => break,
                }
            };
            if let Err(e) = self.execute(&String::from_utf8_lossy(&line)) {
                println!("error: {:#}", e);
            }
        }
    }
}

fn on_input(reactor: &mut Reactor<Rc<App>>, event: Event<Rc<App>>) {
    let app = Rc::clone(&event.arg);
    let mut buf = [0u8; 4096];
    match (&app.input).read(&mut buf) {
        Ok(0) => {
            if !app.partial.borrow().is_empty() {
                app.feed(b"\n");
            }
            tickloop::log_driver!(Level::INFO, "stdin closed");
            app.stop.stop();
            return;
        }
        Ok(n) => app.feed(&buf[..n]),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
        Err(e) => {
            tickloop::log_driver!(Level::ERROR, "Failed to read stdin: {}", e);
            app.stop.stop();
            return;
        }
    }

    if app.stop.is_stopped() {
        return;
    }
    if let Err(e) = event.rearm(reactor, Events::READ, Timeout::Infinite) {
        tickloop::log_driver!(Level::ERROR, "Failed to re-arm stdin: {}", e);
        app.stop.stop();
    }
}

fn on_heartbeat(reactor: &mut Reactor<Rc<App>>, event: Event<Rc<App>>) {
    let snapshot = reactor.metrics();
    let period = event.arg.heartbeat;
    tickloop::log_driver!(
        Level::INFO,
        "heartbeat: {} ticks, {} dispatched, {} pending, {} config entries, up {}s",
        snapshot.ticks,
        snapshot.dispatched,
        reactor.pending(),
        event.arg.store.borrow().len(),
        snapshot.uptime_seconds
    );
    if let Err(e) = event.rearm(reactor, Events::empty(), Timeout::After(period)) {
        tickloop::log_driver!(Level::ERROR, "Failed to re-arm heartbeat: {}", e);
    }
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    let _guard = init_logging(&settings.logging).context("Failed to initialise logging")?;

    let mut store = ConfigStore::with_capacity(settings.store.prealloc_entries)?;
    let seeded = settings
        .seed_store(&mut store)
        .context("Failed to seed config store")?;
    tracing::info!("Seeded {} config entries", seeded);

    let mut engine: Engine<Rc<App>> = Engine::from_settings(&settings)?;
    let input = io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("Failed to duplicate stdin")?;
    let app = Rc::new(App {
        store: RefCell::new(store),
        stop: engine.stop_signal(),
        input: File::from(input),
        partial: RefCell::new(Vec::new()),
        heartbeat: Duration::from_secs(settings.driver.heartbeat_secs),
    });

    engine.reactor_mut().register(
        Descriptor::Fd(app.input.as_raw_fd()),
        Callback::new(on_input),
        Rc::clone(&app),
        Events::READ,
        Timeout::Infinite,
    )?;
    if settings.driver.heartbeat_secs > 0 {
        engine.reactor_mut().register(
            Descriptor::Timer,
            Callback::new(on_heartbeat),
            Rc::clone(&app),
            Events::empty(),
            Timeout::After(app.heartbeat),
        )?;
    }

    let ticks = engine.run()?;
    tracing::info!("Stopped after {} ticks", ticks);

    engine.shutdown();
    if let Ok(app) = Rc::try_unwrap(app) {
        app.store.into_inner().teardown();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        assert_eq!(
            parse_command("set  port uint 8080").unwrap(),
            Some(Command::Set {
                key: "port",
                ty: ConfigType::UInt,
                value: "8080"
            })
        );
        assert_eq!(
            parse_command("set motd string hello there").unwrap(),
            Some(Command::Set {
                key: "motd",
                ty: ConfigType::Str,
                value: "hello there"
            })
        );
        assert_eq!(
            parse_command("set gone void").unwrap(),
            Some(Command::Set {
                key: "gone",
                ty: ConfigType::Void,
                value: ""
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("set port").is_err());
        assert!(parse_command("set port uint").is_err());
        assert!(parse_command("set port float 1.0").is_err());
        assert!(parse_command("del").is_err());
        assert!(parse_command("frobnicate").is_err());
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_simple() {
        assert_eq!(parse_command("get port").unwrap(), Some(Command::Get("port")));
        assert_eq!(parse_command("del port").unwrap(), Some(Command::Del("port")));
        assert_eq!(parse_command("list").unwrap(), Some(Command::List));
        assert_eq!(parse_command("reset").unwrap(), Some(Command::Reset));
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
    }
}
