use rand::seq::SliceRandom;
use shared::protocol::{read_packet, write_packet, Packet};
use shared::Direction;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

/// Sends one request and waits for its response.
async fn request(
    stream: &mut TcpStream,
    packet: &Packet,
) -> Result<Packet, Box<dyn std::error::Error>> {
    write_packet(stream, packet).await?;
    read_packet(stream)
        .await?
        .ok_or_else(|| "coordinator closed the connection".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8000".to_string());

    println!("Connecting to {}", address);
    let mut stream = TcpStream::connect(&address).await?;

    let session = match request(&mut stream, &Packet::Join).await? {
        Packet::Joined { session } => session,
        other => {
            println!("Expected Joined but got: {:?}", other);
            return Ok(());
        }
    };
    println!("Joined session {} heading {:?}", session.id, session.direction);

    let directions = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];
    let mut rng = rand::thread_rng();

    // Steer randomly until the game ends, a little slower than the throttle
    for round in 0..60 {
        if round % 2 == 0 {
            if let Some(direction) = directions.choose(&mut rng) {
                let (dx, dy) = direction.delta();
                let response = request(
                    &mut stream,
                    &Packet::Move {
                        session_id: session.id.clone(),
                        dx,
                        dy,
                    },
                )
                .await?;
                println!("Move {:?}: {:?}", direction, response);
            }
        }

        match request(
            &mut stream,
            &Packet::GetState {
                session_id: session.id.clone(),
            },
        )
        .await?
        {
            Packet::State { session: state } => {
                println!(
                    "Version {}: head {:?}, length {}, score {}",
                    state.version,
                    state.head(),
                    state.body.len(),
                    state.score
                );
                if state.terminal {
                    println!("Game over with score {}", state.score);
                    break;
                }
            }
            other => println!("Unexpected packet: {:?}", other),
        }

        sleep(Duration::from_millis(600)).await;
    }

    println!("Test client finished");
    Ok(())
}
