use shroud_core::obfs::{make_obfuscator, EncryptionMethod};
use shroud_mux::{Session, SessionConfig, SessionId, SessionSide, Stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use clap::Parser;
use anyhow::Result;

/// Command line arguments for the loopback echo demo.
#[derive(Parser, Debug)]
struct Args {
    /// Number of TCP connections carrying the session.
    #[arg(
        short = 'c',
        long = "connections",
        help = "Number of TCP connections carrying the session.",
        default_value = "4"
    )]
    connections: usize,

    /// Number of logical streams to echo over the session.
    #[arg(
        short = 's',
        long = "streams",
        help = "Number of logical streams to echo over the session.",
        default_value = "16"
    )]
    streams: usize,

    /// Encryption method: 0 plain, 1 aes-256-gcm, 2 chacha20-poly1305.
    #[arg(
        short = 'm',
        long = "method",
        help = "Encryption method: 0 plain, 1 aes-256-gcm, 2 chacha20-poly1305.",
        default_value = "1"
    )]
    method: u8,

    /// Deliver frames in arrival order instead of sequence order.
    #[arg(
        long = "unordered",
        help = "Deliver frames in arrival order instead of sequence order.",
        default_value = "false"
    )]
    unordered: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args = Args::parse();
    let method = EncryptionMethod::try_from(args.method)?;
    // Both ends share the key; a real deployment derives it from a handshake.
    let obfuscator = make_obfuscator(method, [0x5a; 32])?;
    tracing::info!("Using {} over {} connections", method, args.connections);

    let config = SessionConfig::new()
        .with_unordered(args.unordered)
        .with_obfuscator(obfuscator);
    let server = Session::new(SessionId(1), config.clone().with_side(SessionSide::Server));
    let client = Session::new(SessionId(1), config.with_side(SessionSide::Client));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    for _ in 0..args.connections {
        let outbound = TcpStream::connect(addr).await?;
        let (inbound, peer) = listener.accept().await?;
        tracing::info!("Accepted connection from {}", peer);
        server.add_connection(inbound)?;
        client.add_connection(outbound)?;
    }

    tokio::spawn({
        let server = server.clone();
        async move {
            loop {
                match server.accept().await {
                    Ok(stream) => {
                        tokio::spawn(handle_stream(stream));
                    }
                    Err(e) => {
                        tracing::info!("Stopped accepting streams: {}", e);
                        break;
                    }
                }
            }
        }
    });

    let mut tasks = Vec::new();
    for i in 0..args.streams {
        let mut stream = client.open_stream()?;
        tasks.push(tokio::spawn(async move {
            let message = format!("Hello from stream {}!", i);
            stream.write_all(message.as_bytes()).await?;
            let mut reply = vec![0u8; message.len()];
            stream.read_exact(&mut reply).await?;
            stream.shutdown().await?;
            tracing::info!("Stream {} echoed: {}", stream.id(), String::from_utf8_lossy(&reply));
            anyhow::ensure!(reply == message.as_bytes(), "stream {} echoed the wrong bytes", stream.id());
            Ok::<(), anyhow::Error>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    client.close().await?;
    server.close().await?;
    tracing::info!("Done");
    Ok(())
}

async fn handle_stream(mut stream: Stream) {
    tracing::info!("Handling stream ID: {}", stream.id());
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            // Closed by the client once it has its echo.
            Err(_) => break,
        };
        if let Err(e) = stream.write_all(&buf[..n]).await {
            tracing::info!("Error echoing on stream {}: {}", stream.id(), e);
            break;
        }
    }
    tracing::info!("Stream {} finished", stream.id());
}
