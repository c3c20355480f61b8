//! Read-only Spectator driver.
//!
//! Watches a battle hosted elsewhere and takes part in the chat.
//!
//! Usage: spectator <HOST_ADDR> [NAME]

use std::net::SocketAddr;

use arbok_battle::BattlePokemon;
use arbok_peer::{Peer, PeerConfig, PeerError, PeerHandler};
use tokio::io::{AsyncBufReadExt, BufReader};

struct Console;

impl PeerHandler for Console {
    fn on_connected(&mut self, seed: u32) {
        if seed == 0 {
            println!("Spectating. No battle has started yet.");
        } else {
            println!("Spectating. Session seed: {}", seed);
        }
    }

    fn on_battle_started(&mut self, first: &BattlePokemon, second: &BattlePokemon) {
        println!(
            "Battle: {} ({} HP) vs {} ({} HP)",
            first.name(),
            first.max_hp,
            second.name(),
            second.max_hp
        );
    }

    fn on_battle_event(&mut self, text: &str) {
        println!("{}", text);
    }

    fn on_game_over(&mut self, winner: &str, loser: &str) {
        println!("Game over: {} defeated {}!", winner, loser);
    }

    fn on_chat(&mut self, sender: &str, text: &str) {
        println!("{}: {}", sender, text);
    }

    fn on_sticker(&mut self, sender: &str, _data: &str) {
        println!("{} sent a sticker", sender);
    }

    fn on_error(&mut self, error: &PeerError) {
        println!("Error: {}", error);
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host: SocketAddr = match args.next().and_then(|a| a.parse().ok()) {
        Some(addr) => addr,
        None => {
            eprintln!("Usage: spectator <HOST_ADDR> [NAME]");
            std::process::exit(1);
        }
    };
    let name = args.next().unwrap_or_else(|| "Spectator".to_string());

    let config = PeerConfig::default().with_name(&name);
    let (peer, handle) = match Peer::spectate(config, host).await {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };
    println!("Watching {}. Type to chat, /quit to leave.", host);

    let mut task = tokio::spawn(async move {
        let mut console = Console;
        peer.run(&mut console).await
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            result = &mut task => {
                let code = match result {
                    Ok(Ok(())) => 0,
                    Ok(Err(e)) => {
                        eprintln!("Session ended: {}", e);
                        e.exit_code()
                    }
                    Err(e) => {
                        eprintln!("Peer task failed: {}", e);
                        1
                    }
                };
                std::process::exit(code);
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line == "/quit" || line == "/exit" {
                            let _ = handle.shutdown();
                            break;
                        }
                        if !line.is_empty() {
                            if let Err(e) = handle.send_chat(line) {
                                println!("Error: {}", e);
                            }
                        }
                    }
                    _ => {
                        let _ = handle.shutdown();
                        break;
                    }
                }
            }
        }
    }

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => std::process::exit(e.exit_code()),
        Err(_) => std::process::exit(1),
    }
}
