//! Connects to an echo server, sends one message and prints the reply.
//!
//! ```text
//! cargo run --example echo_client -- 127.0.0.1:7878 "hello"
//! ```

#[cfg(target_os = "linux")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::cell::RefCell;
    use std::rc::Rc;

    use ringline_ready::{Adapter, Config, SockError, UringBackend};

    let mut args = std::env::args().skip(1);
    let target: std::net::SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:7878".to_string())
        .parse()?;
    let message = args
        .next()
        .unwrap_or_else(|| "Hello from ringline-ready!".to_string())
        .into_bytes();

    let config = Config::default();
    let mut adapter = Adapter::new(UringBackend::new(&config)?, &config)?;
    let conn = adapter.connect(target)?;
    eprintln!("connecting to {target}");

    let reply = Rc::new(RefCell::new(Vec::new()));
    {
        let reply = reply.clone();
        let total = message.len();
        let mut sent = 0;
        adapter.register_callback(conn, move |a, h, ready| {
            if ready.writable && sent < total {
                match a.send(h, &message[sent..]) {
                    Ok(n) => sent += n,
                    Err(SockError::WouldBlock) => {}
                    Err(e) => {
                        eprintln!("send failed: {e}");
                        a.stop();
                        return;
                    }
                }
            }
            if ready.readable {
                let mut buf = [0u8; 4096];
                loop {
                    match a.recv(h, &mut buf) {
                        Ok(n) => reply.borrow_mut().extend_from_slice(&buf[..n]),
                        Err(SockError::WouldBlock) => break,
                        Err(SockError::EndOfStream) => {
                            eprintln!("connection closed by peer");
                            a.stop();
                            return;
                        }
                        Err(e) => {
                            eprintln!("recv failed: {e}");
                            a.stop();
                            return;
                        }
                    }
                }
                if reply.borrow().len() >= total {
                    a.stop();
                }
            }
        })?;
    }

    adapter.run()?;
    println!("{}", String::from_utf8_lossy(&reply.borrow()));
    adapter.close(conn)?;
    adapter.shutdown()?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("echo_client requires Linux (io_uring)");
}
