//! Interactive Host driver.
//!
//! Binds the listening side of a battle session, then reads commands from
//! stdin. Run a `joiner` (and optionally `spectator`s) against it.
//!
//! Usage: host [PORT] [NAME]

use arbok_battle::{BattlePokemon, MoveDex, PokemonStats, StatBoosts, Type};
use arbok_peer::{Peer, PeerConfig, PeerError, PeerHandler, HOST_PORT};
use tokio::io::{AsyncBufReadExt, BufReader};

struct Console;

impl PeerHandler for Console {
    fn on_connected(&mut self, seed: u32) {
        println!("Joiner connected. Session seed: {}", seed);
        println!("Pick a Pokemon with /battle <name> (try /pokemon)");
    }

    fn on_spectator_joined(&mut self, addr: std::net::SocketAddr) {
        println!("Spectator joined from {}", addr);
    }

    fn on_battle_started(&mut self, me: &BattlePokemon, opponent: &BattlePokemon) {
        println!(
            "Battle start: {} ({} HP) vs {} ({} HP)",
            me.name(),
            me.max_hp,
            opponent.name(),
            opponent.max_hp
        );
    }

    fn on_turn_changed(&mut self, my_turn: bool) {
        if my_turn {
            println!("Your move. /move <name>, /boosted <name>, or /guard first.");
        } else {
            println!("Waiting for the opponent...");
        }
    }

    fn on_battle_event(&mut self, text: &str) {
        println!("{}", text);
    }

    fn on_discrepancy(&mut self) {
        println!("Calculations disagreed once; resolving...");
    }

    fn on_game_over(&mut self, winner: &str, loser: &str) {
        println!("Game over: {} defeated {}!", winner, loser);
        println!("Type /rematch to go again, /quit to leave.");
    }

    fn on_rematch_offer(&mut self) {
        println!("The opponent wants a rematch (/rematch to accept).");
    }

    fn on_rematch_agreed(&mut self) {
        println!("Rematch! Pick a Pokemon with /battle <name>.");
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

fn catalog() -> Vec<PokemonStats> {
    vec![
        PokemonStats {
            name: "Pikachu".into(),
            hp: 35,
            attack: 55,
            defense: 40,
            sp_attack: 50,
            sp_defense: 50,
            speed: 90,
            type1: Type::Electric,
            type2: None,
        },
        PokemonStats {
            name: "Charmander".into(),
            hp: 39,
            attack: 52,
            defense: 43,
            sp_attack: 60,
            sp_defense: 50,
            speed: 65,
            type1: Type::Fire,
            type2: None,
        },
        PokemonStats {
            name: "Squirtle".into(),
            hp: 44,
            attack: 48,
            defense: 65,
            sp_attack: 50,
            sp_defense: 64,
            speed: 43,
            type1: Type::Water,
            type2: None,
        },
        PokemonStats {
            name: "Bulbasaur".into(),
            hp: 45,
            attack: 49,
            defense: 49,
            sp_attack: 65,
            sp_defense: 65,
            speed: 45,
            type1: Type::Grass,
            type2: Some(Type::Poison),
        },
        PokemonStats {
            name: "Gyarados".into(),
            hp: 95,
            attack: 125,
            defense: 79,
            sp_attack: 60,
            sp_defense: 100,
            speed: 81,
            type1: Type::Water,
            type2: Some(Type::Flying),
        },
    ]
}

fn print_help() {
    println!("Commands:");
    println!("  /pokemon          - list the demo stat blocks");
    println!("  /battle <name>    - choose a Pokemon and send BattleSetup");
    println!("  /moves            - list known moves");
    println!("  /move <name>      - attack with a move");
    println!("  /boosted <name>   - attack with a special-attack boost");
    println!("  /guard            - arm a special-defense boost");
    println!("  /rematch          - offer or accept a rematch");
    println!("  /quit             - exit");
    println!("  <anything else>   - chat");
}

fn handle_input(line: &str, handle: &arbok_peer::PeerHandle) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    if let Some(rest) = line.strip_prefix('/') {
        let parts: Vec<&str> = rest.splitn(2, ' ').collect();
        let cmd = parts[0];
        let arg = parts.get(1).map(|s| s.trim());

        let result = match cmd {
            "help" => {
                print_help();
                Ok(())
            }
            "pokemon" => {
                for stats in catalog() {
                    println!("  {} ({} HP)", stats.name, stats.hp);
                }
                Ok(())
            }
            "moves" => {
                let dex = MoveDex::builtin();
                let mut names = dex.all_names();
                names.sort_unstable();
                for name in names {
                    println!("  {}", name);
                }
                Ok(())
            }
            "battle" => match arg {
                Some(name) => {
                    match catalog()
                        .into_iter()
                        .find(|s| s.name.eq_ignore_ascii_case(name))
                    {
                        Some(stats) => handle.start_battle(stats, StatBoosts::default()),
                        None => {
                            println!("Unknown Pokemon: {}", name);
                            Ok(())
                        }
                    }
                }
                None => {
                    println!("Usage: /battle <name>");
                    Ok(())
                }
            },
            "move" => match arg {
                Some(name) => handle.submit_move(name, false),
                None => {
                    println!("Usage: /move <name>");
                    Ok(())
                }
            },
            "boosted" => match arg {
                Some(name) => handle.submit_move(name, true),
                None => {
                    println!("Usage: /boosted <name>");
                    Ok(())
                }
            },
            "guard" => handle.arm_defense_boost(),
            "rematch" => handle.request_rematch(),
            "quit" | "exit" => {
                let _ = handle.shutdown();
                return false;
            }
            _ => {
                println!("Unknown command: /{}. Type /help for commands.", cmd);
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("Error: {}", e);
        }
    } else if let Err(e) = handle.send_chat(line) {
        println!("Error: {}", e);
    }

    true
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(HOST_PORT);
    let name = args.next().unwrap_or_else(|| "Host".to_string());

    let config = PeerConfig::host().with_port(port).with_name(&name);
    let (peer, handle) = match Peer::host(config).await {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Failed to bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };
    println!("Hosting on port {}. Waiting for a joiner...", port);
    print_help();

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
                        if !handle_input(&line, &handle) {
                            break;
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
