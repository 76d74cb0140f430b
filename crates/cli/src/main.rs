use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;

use anyhow::Context;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use shaledb_server::wire::Frame;

/// Interactive shaledb client.
#[derive(Debug, Parser)]
#[command(name = "shaledb-cli", version, about)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 9999)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline(":> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let sql = line.trim();
        if sql.is_empty() {
            continue;
        }
        if sql.eq_ignore_ascii_case("exit") || sql.eq_ignore_ascii_case("quit") {
            break;
        }
        let _ = editor.add_history_entry(sql);

        writer.write_all(Frame::Data(sql.as_bytes().to_vec()).encode().as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        let mut reply = String::new();
        if reader.read_line(&mut reply)? == 0 {
            eprintln!("server closed the connection");
            break;
        }
        match Frame::decode(&reply) {
            Ok(Frame::Data(body)) => println!("{}", String::from_utf8_lossy(&body)),
            Ok(Frame::Err(msg)) => eprintln!("error: {msg}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}
