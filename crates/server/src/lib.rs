//! The shaledb TCP server.
//!
//! One newline-terminated hex frame per request and per response (see
//! [`wire`]); each accepted connection becomes a task on a bounded
//! [`pool::WorkerPool`]. A session owns its executor, so transaction state
//! is per-connection; EOF closes the session silently, aborting any open
//! transaction.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use log::{info, warn};

use shaledb_sql::Database;

pub mod config;
pub mod pool;
pub mod wire;

use pool::WorkerPool;
use wire::Frame;

/// Accepts connections forever, dispatching each onto the pool.
pub fn serve(listener: TcpListener, db: Arc<Database>, pool: &WorkerPool) {
    info!(
        "listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".into())
    );
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let db = db.clone();
                pool.execute(move || handle_client(stream, db));
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

fn handle_client(stream: TcpStream, db: Arc<Database>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("client connected: {peer}");

    let reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(e) => {
            warn!("failed to clone stream for {peer}: {e}");
            return;
        }
    };
    let mut writer = BufWriter::new(stream);
    let mut session = db.session();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let reply = match Frame::decode(&line) {
            Ok(Frame::Data(body)) => match std::str::from_utf8(&body) {
                Ok(sql) => match session.execute(sql) {
                    Ok(result) => Frame::Data(result),
                    Err(e) => Frame::error(e),
                },
                Err(_) => Frame::error(wire::InvalidPkgData),
            },
            Ok(Frame::Err(_)) => Frame::error(wire::InvalidPkgData),
            Err(e) => Frame::error(e),
        };
        if writer
            .write_all(reply.encode().as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush())
            .is_err()
        {
            break;
        }
    }

    session.close();
    info!("client disconnected: {peer}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaledb_core::PAGE_SIZE;
    use std::thread;
    use tempfile::TempDir;

    fn start_server(dir: &TempDir) -> std::net::SocketAddr {
        let db = Arc::new(
            Database::create(&dir.path().join("db"), 256 * PAGE_SIZE as u64).unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let pool = WorkerPool::new(2, 4);
            serve(listener, db, &pool);
        });
        addr
    }

    fn roundtrip(reader: &mut impl BufRead, writer: &mut impl Write, sql: &str) -> Frame {
        let frame = Frame::Data(sql.as_bytes().to_vec());
        writer.write_all(frame.encode().as_bytes()).unwrap();
        writer.write_all(b"\n").unwrap();
        writer.flush().unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        Frame::decode(&line).unwrap()
    }

    #[test]
    fn sessions_execute_sql_over_the_wire() {
        let dir = TempDir::new().unwrap();
        let addr = start_server(&dir);

        let stream = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = BufWriter::new(stream);

        let reply = roundtrip(&mut reader, &mut writer, "create table t k int32 (index k)");
        assert!(matches!(reply, Frame::Data(_)));
        roundtrip(&mut reader, &mut writer, "insert into t values 3");
        let reply = roundtrip(&mut reader, &mut writer, "select * from t where k = 3");
        assert_eq!(reply, Frame::Data(b"3".to_vec()));

        // Errors come back as kind-1 frames, the session stays usable.
        let reply = roundtrip(&mut reader, &mut writer, "select * from missing");
        assert!(matches!(reply, Frame::Err(_)));
        let reply = roundtrip(&mut reader, &mut writer, "select * from t where k = 3");
        assert_eq!(reply, Frame::Data(b"3".to_vec()));
    }

    #[test]
    fn garbage_lines_get_an_error_frame() {
        let dir = TempDir::new().unwrap();
        let addr = start_server(&dir);

        let stream = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = BufWriter::new(stream);

        writer.write_all(b"not hex at all\n").unwrap();
        writer.flush().unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(matches!(Frame::decode(&line).unwrap(), Frame::Err(_)));
    }

    #[test]
    fn disconnect_aborts_the_open_transaction() {
        let dir = TempDir::new().unwrap();
        let addr = start_server(&dir);

        {
            let stream = TcpStream::connect(addr).unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = BufWriter::new(stream);
            roundtrip(&mut reader, &mut writer, "create table t k int32 (index k)");
            roundtrip(&mut reader, &mut writer, "begin");
            roundtrip(&mut reader, &mut writer, "insert into t values 9");
            // Dropping the socket ends the session mid-transaction.
        }

        let stream = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = BufWriter::new(stream);
        // The abort may race the new connection; poll briefly.
        for _ in 0..50 {
            let reply = roundtrip(&mut reader, &mut writer, "select * from t where k = 9");
            if reply == Frame::Data(Vec::new()) {
                return;
            }
            thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("transaction was not aborted on disconnect");
    }
}
