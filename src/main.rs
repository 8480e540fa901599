//! Demo driver.
//!
//! With an engine binary the engine plays itself, optionally after replaying
//! an opening line:
//!
//! ```text
//! chesslink /usr/bin/stockfish "e2e4 e7e5"
//! ```
//!
//! Without arguments it reads SAN moves from stdin for a two-human game.
//! Every accepted move is printed as one JSON object per line.

use std::env;
use std::time::Duration;

use anyhow::Result;
use chesslink::util::parse_uci_moves;
use chesslink::{EngineColor, Game, GamePhase, SearchOptions, UciProcess, UciSession};
use log::info;
use shakmaty::uci::UciMove;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let mut args = env::args().skip(1);
    match args.next() {
        Some(engine_path) => {
            let opening = args.next().unwrap_or_default();
            engine_game(&engine_path, &opening).await
        }
        None => human_game().await,
    }
}

fn setup_logging() -> Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

async fn engine_game(engine_path: &str, opening: &str) -> Result<()> {
    let session = UciSession::new(
        SearchOptions {
            move_time: Duration::from_millis(500),
            depth: 12,
            color: EngineColor::None,
        },
        UciProcess::new(engine_path),
    );
    let game = Game::builder()
        .engine(session)
        .on_move(|record| println!("{}", record.to_json()))
        .on_game_over(|over| {
            if let Ok(json) = serde_json::to_string(over) {
                println!("{json}");
            }
        })
        .build()?;

    game.start().await?;
    for mv in parse_uci_moves(opening)? {
        match mv {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => {
                game.make_move(from, to, promotion).await?;
            }
            other => anyhow::bail!("cannot replay opening move '{other}'"),
        }
    }

    // ply cap so two engines cannot shuffle pieces forever
    while game.game_over().await.is_none() && game.history().await.len() < 300 {
        game.play_engine_move().await?;
        while game.phase().await == GamePhase::EngineThinking {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    if let Some(over) = game.game_over().await {
        info!(
            "finished: {:?}, {:?} (score {})",
            over.reason,
            over.result,
            over.result.score()
        );
    } else {
        info!("stopped at the ply cap");
    }
    Ok(())
}

async fn human_game() -> Result<()> {
    let game = Game::builder()
        .on_move(|record| println!("{}", record.to_json()))
        .build()?;

    info!("no engine given - reading SAN moves from stdin ('undo', 'quit')");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => continue,
            "quit" => break,
            "undo" => {
                if game.undo().await?.is_none() {
                    info!("nothing to undo");
                }
            }
            san => {
                if !game.try_san(san).await {
                    info!("'{san}' is not a legal move here");
                }
            }
        }
        if let Some(over) = game.game_over().await {
            info!(
                "game over: {:?}, {:?} (score {})",
                over.reason,
                over.result,
                over.result.score()
            );
            break;
        }
    }
    Ok(())
}
