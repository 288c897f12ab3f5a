//! Starts a Gambit server and relays a short opening between two players
//! over WebSocket.
//!
//! ```text
//! RUST_LOG=debug cargo run -p chess-relay [bind-addr]
//! ```

use std::time::Duration;

use gambit::prelude::*;
use gambit::transport::WebSocketConnector;
use gambit_client::{ClientConfig, ClientEvent, ConnectionManager, Lobby, SessionContext};
use tracing_subscriber::EnvFilter;

/// King's pawn, king's pawn, knight, knight. Row 0 is black's back rank.
const OPENING: [((u8, u8), (u8, u8)); 4] = [
    ((6, 4), (4, 4)),
    ((1, 4), (3, 4)),
    ((7, 6), (5, 5)),
    ((0, 1), (2, 2)),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:0".to_string());
    let server = GambitServer::builder().bind(&bind).build().await?;
    let addr = server.local_addr()?;
    tracing::info!(%addr, "server listening");
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    let moves = play(&format!("ws://{addr}")).await?;
    for event in &moves {
        println!(
            "{:>2}. {:<6} {} -> {}",
            event.seq, event.participant_id, event.from, event.to
        );
    }
    Ok(())
}

/// alice (white) creates a session, bob (black) joins, and they alternate
/// through [`OPENING`]. Returns the moves in the order bob received them.
async fn play(url: &str) -> Result<Vec<MoveEvent>, Box<dyn std::error::Error>> {
    let connector = WebSocketConnector::new(url);
    let lobby = Lobby::new(connector.clone());

    let session_id = lobby.create_session("alice", Side::White).await?;
    let snapshot = lobby.join_session(&session_id, "bob").await?;
    let bob_ctx = SessionContext::from_snapshot(&snapshot, &ParticipantId::from("bob"))
        .ok_or("bob is missing from the joined session")?;
    let alice_ctx = SessionContext::new(session_id.clone(), "alice", Side::White);

    let (mut alice, _alice_inbox) =
        ConnectionManager::new(connector.clone(), alice_ctx, ClientConfig::default());
    let (mut bob, mut bob_inbox) = ConnectionManager::new(connector, bob_ctx, ClientConfig::default());
    alice.connect().await?;
    bob.connect().await?;

    for (i, (from, to)) in OPENING.into_iter().enumerate() {
        let player = if i % 2 == 0 { &mut alice } else { &mut bob };
        player
            .submit_move(Coord::new(from.0, from.1), Coord::new(to.0, to.1))
            .await?;
    }

    let mut seen = Vec::with_capacity(OPENING.len());
    while seen.len() < OPENING.len() {
        match tokio::time::timeout(Duration::from_secs(5), bob_inbox.recv()).await? {
            Some(ClientEvent::Move(event)) => seen.push(event),
            Some(_) => {}
            None => break,
        }
    }

    alice.disconnect().await;
    bob.disconnect().await;
    lobby.close_session(&session_id).await?;
    Ok(seen)
}
