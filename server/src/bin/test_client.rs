//! Headless bot for smoke-testing a running server: logs in, sends ready,
//! walks in a circle and prints what comes back.

use clap::Parser;
use shared::{
    AnimationName, ClientReady, LoginRequest, Packet, PlayerDisconnect, PlayerUpdate,
    ReassemblyBuffer, Username,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::{interval, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:5000")]
    server: String,

    /// Name to log in with
    #[arg(short = 'u', long, default_value = "bot")]
    username: String,

    /// Seconds to stay connected after becoming ready
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// Position updates per second
    #[arg(short = 'r', long, default_value = "20")]
    rate: u32,
}

async fn send(writer: &mut OwnedWriteHalf, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
    writer.write_all(&packet.encode()?).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);
    let (mut reader, mut writer) = stream.into_split();

    let username = Username::new(&args.username);
    send(&mut writer, &Packet::LoginRequest(LoginRequest { username })).await?;

    let mut buffer = ReassemblyBuffer::new();
    let mut chunk = [0u8; 4096];
    let mut ticker = interval(Duration::from_secs_f32(1.0 / args.rate.max(1) as f32));
    let mut client_id = None;
    let mut ready_at: Option<Instant> = None;
    let mut tiger_updates = 0u64;

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                let len = read?;
                if len == 0 {
                    println!("Server closed the connection");
                    break;
                }
                buffer.extend(&chunk[..len])?;

                for result in buffer.drain_packets() {
                    match result? {
                        Packet::LoginResponse(response) => {
                            println!(
                                "Login {}: {} (client id {})",
                                if response.success { "accepted" } else { "rejected" },
                                response.message,
                                response.client_id
                            );
                            if !response.success {
                                return Ok(());
                            }
                            client_id = Some(response.client_id);
                            send(&mut writer, &Packet::ClientReady(ClientReady {
                                client_id: response.client_id,
                            }))
                            .await?;
                            ready_at = Some(Instant::now());
                        }
                        Packet::TigerUpdate(_) => tiger_updates += 1,
                        Packet::TigerSpawn(t) => {
                            println!("Tiger {} at ({:.1}, {:.1}, {:.1})", t.tiger_id, t.x, t.y, t.z);
                        }
                        Packet::TreeSpawn(t) => {
                            println!("{} trees", t.tree_count);
                            for tree in t.placements() {
                                println!("  tree at ({:.1}, {:.1}) rot {:.0}", tree.x, tree.z, tree.rot_y);
                            }
                        }
                        Packet::PlayerSpawn(p) => println!("Player {} ({}) joined", p.player_id, p.username),
                        Packet::PlayerDisconnect(p) => println!("Player {} ({}) left", p.player_id, p.username),
                        Packet::PlayerUpdate(u) => {
                            println!("Player {} at ({:.1}, {:.1})", u.client_id, u.x, u.z);
                        }
                        other => println!("Received {:?}", other.packet_type()),
                    }
                }
            }

            _ = ticker.tick() => {
                let (Some(id), Some(started)) = (client_id, ready_at) else {
                    continue;
                };

                let elapsed = started.elapsed();
                if elapsed >= Duration::from_secs(args.duration) {
                    break;
                }

                let angle = elapsed.as_secs_f32() * 0.5;
                let update = PlayerUpdate {
                    client_id: id,
                    x: 500.0 + 60.0 * angle.cos(),
                    y: 0.0,
                    z: 500.0 + 60.0 * angle.sin(),
                    rot_y: angle.to_degrees() % 360.0,
                    animation_file: AnimationName::new("player_walk.fbx"),
                    animation_time: elapsed.as_secs_f32(),
                };
                send(&mut writer, &Packet::PlayerUpdate(update)).await?;
            }
        }
    }

    if let Some(id) = client_id {
        send(
            &mut writer,
            &Packet::PlayerDisconnect(PlayerDisconnect {
                player_id: id,
                username,
            }),
        )
        .await?;
    }
    println!("Received {} tiger updates", tiger_updates);

    Ok(())
}
