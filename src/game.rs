use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use shakmaty::uci::UciMove;
use shakmaty::{Color, Role, Square};
use tokio::sync::{Mutex, MutexGuard};

use crate::board::{BoardAdapter, BoardSync, BoardWidget, NullBoard};
use crate::error::{Error, Result};
use crate::position::PositionStore;
use crate::rules::{
    Dests, GameOverInfo, MoveRecord, PieceAt, Rules, STARTING_FEN, standard_rules,
};
use crate::uci::{SearchState, UciSession};
use crate::util;

/// Coordinator lifecycle. `Idle` and `AwaitingEngineInit` only occur when an
/// engine session is attached; without one the game starts out `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Idle,
    AwaitingEngineInit,
    Ready,
    EngineThinking,
    GameOver,
}

/// What happens when a move arrives while the engine is thinking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MovePolicy {
    /// The move is refused with [`Error::EngineBusy`].
    Reject,
    /// The search is cancelled, its reply discarded, and the move played.
    #[default]
    InterruptSearch,
}

#[derive(Debug, Clone)]
pub struct GameSnapshot {
    pub fen: String,
    pub turn: Color,
    pub move_number: u32,
    pub in_check: bool,
    pub phase: GamePhase,
    pub game_over: Option<GameOverInfo>,
    pub last_move: Option<(Square, Square)>,
    pub history_len: usize,
}

type ChangeHook = Box<dyn Fn(&GameSnapshot) + Send + Sync>;
type MoveHook = Box<dyn Fn(&MoveRecord) + Send + Sync>;
type GameOverHook = Box<dyn Fn(&GameOverInfo) + Send + Sync>;
type PromotionHook = Box<dyn Fn(Square, Color) -> BoxFuture<'static, Role> + Send + Sync>;

#[derive(Default)]
struct Hooks {
    change: Vec<ChangeHook>,
    moved: Vec<MoveHook>,
    over: Vec<GameOverHook>,
    promotion: Option<PromotionHook>,
}

struct Inner {
    store: PositionStore,
    board: BoardAdapter,
    phase: GamePhase,
    /// Bumped whenever the position changes out from under an outstanding
    /// search; a reply carrying a stale epoch is discarded.
    epoch: u64,
    orientation: Color,
}

/// Whether a move came in from the board widget (already rendered there) or
/// from code/the engine (the widget still has to animate it).
#[derive(Clone, Copy, PartialEq, Eq)]
enum MoveOrigin {
    Widget,
    Program,
}

/// Builder for [`Game`]. Everything is optional; the zero-config build is a
/// headless two-human game from the starting position.
pub struct GameBuilder {
    fen: Option<String>,
    rules: Option<Box<dyn Rules>>,
    widget: Option<Box<dyn BoardWidget>>,
    engine: Option<UciSession>,
    policy: MovePolicy,
    hooks: Hooks,
}

impl GameBuilder {
    fn new() -> GameBuilder {
        GameBuilder {
            fen: None,
            rules: None,
            widget: None,
            engine: None,
            policy: MovePolicy::default(),
            hooks: Hooks::default(),
        }
    }

    pub fn fen(mut self, fen: impl Into<String>) -> Self {
        self.fen = Some(fen.into());
        self
    }

    pub fn rules(mut self, rules: Box<dyn Rules>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn widget(mut self, widget: Box<dyn BoardWidget>) -> Self {
        self.widget = Some(widget);
        self
    }

    pub fn engine(mut self, engine: UciSession) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn policy(mut self, policy: MovePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fires after every mutating operation, with the fresh snapshot.
    pub fn on_change(mut self, f: impl Fn(&GameSnapshot) + Send + Sync + 'static) -> Self {
        self.hooks.change.push(Box::new(f));
        self
    }

    /// Fires once per accepted move, after the state-change hook.
    pub fn on_move(mut self, f: impl Fn(&MoveRecord) + Send + Sync + 'static) -> Self {
        self.hooks.moved.push(Box::new(f));
        self
    }

    /// Fires exactly once per detected game end.
    pub fn on_game_over(mut self, f: impl Fn(&GameOverInfo) + Send + Sync + 'static) -> Self {
        self.hooks.over.push(Box::new(f));
        self
    }

    /// Asynchronous promotion-piece chooser, called with the destination
    /// square and the board orientation. Without one, promotions without an
    /// explicit piece default to the queen.
    pub fn on_promotion<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Square, Color) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Role> + Send + 'static,
    {
        self.hooks.promotion = Some(Box::new(move |sq, color| f(sq, color).boxed()));
        self
    }

    pub fn build(self) -> Result<Game> {
        let rules = self.rules.unwrap_or_else(standard_rules);
        let store = PositionStore::new(rules, self.fen.as_deref())?;
        let phase = if store.game_over().is_some() {
            GamePhase::GameOver
        } else if self.engine.is_some() {
            GamePhase::Idle
        } else {
            GamePhase::Ready
        };
        let mut inner = Inner {
            store,
            board: BoardAdapter::new(self.widget.unwrap_or_else(|| Box::new(NullBoard))),
            phase,
            epoch: 0,
            orientation: Color::White,
        };
        let view = board_view(&inner);
        inner.board.refresh(&view);
        Ok(Game {
            inner: Arc::new(Mutex::new(inner)),
            engine: self.engine,
            hooks: Arc::new(self.hooks),
            policy: self.policy,
        })
    }
}

/// Coordinates the rules engine, the board widget and the optional search
/// engine. Clones share one game; the handle is what background tasks (and
/// widget event callbacks) hold on to.
///
/// The inner lock is held across the promotion chooser, so moves arriving
/// while a promotion dialog is open queue up behind it instead of observing a
/// half-made move.
#[derive(Clone)]
pub struct Game {
    inner: Arc<Mutex<Inner>>,
    engine: Option<UciSession>,
    hooks: Arc<Hooks>,
    policy: MovePolicy,
}

impl Game {
    pub fn builder() -> GameBuilder {
        GameBuilder::new()
    }

    pub fn engine(&self) -> Option<&UciSession> {
        self.engine.as_ref()
    }

    /// Brings an attached engine up. Resolves once the engine has completed
    /// its handshake; if it is then the engine's turn, a search is dispatched
    /// in the background. Without an attached engine this is a no-op.
    pub async fn start(&self) -> Result<()> {
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        let prev = {
            let mut inner = self.inner.lock().await;
            let prev = inner.phase;
            if prev == GamePhase::Idle {
                inner.phase = GamePhase::AwaitingEngineInit;
                self.fire_change(&inner);
            }
            prev
        };
        // GameOver at build time still warrants an engine: a later load may
        // hand it the move.
        if prev != GamePhase::Idle && prev != GamePhase::GameOver {
            return Ok(());
        }
        if let Err(e) = engine.init().await {
            // the session resets itself, so a retried start() re-enters here
            let mut inner = self.inner.lock().await;
            if inner.phase == GamePhase::AwaitingEngineInit {
                inner.phase = GamePhase::Idle;
                self.fire_change(&inner);
            }
            return Err(e);
        }

        let mut inner = self.inner.lock().await;
        if inner.phase == GamePhase::AwaitingEngineInit {
            inner.phase = GamePhase::Ready;
        }
        self.after_mutation(&mut inner, None, true);
        Ok(())
    }

    /// Plays a move given as coordinates. When the move promotes and no piece
    /// is supplied, the promotion chooser (or the queen default) decides.
    pub async fn make_move(
        &self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
    ) -> Result<MoveRecord> {
        self.apply_move(from, to, promotion, MoveOrigin::Program).await
    }

    /// Entry point for the board widget's move event. On an illegal move the
    /// widget is re-synced to the authoritative position and the error
    /// returned.
    pub async fn user_move(&self, from: Square, to: Square) -> Result<MoveRecord> {
        match self.apply_move(from, to, None, MoveOrigin::Widget).await {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("rejected board move {from}{to}: {e}");
                let mut inner = self.inner.lock().await;
                let view = board_view(&inner);
                inner.board.refresh(&view);
                Err(e)
            }
        }
    }

    /// Plays a move given in standard algebraic notation.
    pub async fn play_san(&self, san: &str) -> Result<MoveRecord> {
        let mut inner = self.begin_move().await?;
        let record = inner.store.apply_san(san)?;
        inner.board.play(record.from, record.to);
        self.after_mutation(&mut inner, Some(&record), true);
        Ok(record)
    }

    /// Like [`Game::play_san`] but reports rejection as `false` instead of an
    /// error, for speculative input (move lists, text entry).
    pub async fn try_san(&self, san: &str) -> bool {
        match self.play_san(san).await {
            Ok(_) => true,
            Err(e) => {
                debug!("move '{san}' rejected: {e}");
                false
            }
        }
    }

    /// Asks the attached engine for one move in the current position,
    /// regardless of its colour assignment. The search runs in the
    /// background; the move lands via the usual event pipeline.
    pub async fn play_engine_move(&self) -> Result<()> {
        let engine = self
            .engine
            .as_ref()
            .ok_or(Error::EngineNotInitialised)?
            .clone();
        let mut inner = self.inner.lock().await;
        match inner.phase {
            GamePhase::GameOver => Err(Error::GameOver),
            GamePhase::Idle => Err(Error::EngineNotInitialised),
            GamePhase::AwaitingEngineInit => Err(Error::EngineNotReady(engine.state())),
            GamePhase::EngineThinking => Err(Error::EngineBusy),
            GamePhase::Ready => {
                self.dispatch_search(&mut inner, engine);
                Ok(())
            }
        }
    }

    /// Replaces the whole position. Valid in any phase; an in-flight search is
    /// cancelled and its reply discarded. On a FEN that does not parse the
    /// game is left exactly as it was.
    pub async fn load(&self, fen: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // Validate first: a rejected FEN must leave the phase, the epoch and
        // any in-flight search untouched.
        inner.store.load(fen)?;
        if inner.phase == GamePhase::EngineThinking {
            inner.epoch += 1;
            inner.phase = GamePhase::Ready;
            if let Some(engine) = &self.engine {
                if let Err(e) = engine.stop_search().await {
                    // a dead worker has no search left to cancel
                    warn!("could not cancel the superseded search: {e}");
                }
            }
        }
        if !matches!(inner.phase, GamePhase::Idle | GamePhase::AwaitingEngineInit) {
            inner.phase = GamePhase::Ready;
        }
        info!("loaded position {fen}");
        self.after_mutation(&mut inner, None, true);
        Ok(())
    }

    /// Back to the standard starting position.
    pub async fn reset(&self) -> Result<()> {
        self.load(STARTING_FEN).await
    }

    /// Reverts the last move. Un-ends a finished game; refused while the
    /// engine is thinking. Deliberately does not hand the engine the move
    /// afterwards, so a player can take back a full move pair undo by undo.
    pub async fn undo(&self) -> Result<Option<MoveRecord>> {
        let mut inner = self.inner.lock().await;
        if inner.phase == GamePhase::EngineThinking {
            return Err(Error::EngineBusy);
        }
        let undone = inner.store.undo();
        if undone.is_some() {
            inner.epoch += 1;
            if inner.phase == GamePhase::GameOver && inner.store.game_over().is_none() {
                inner.phase = GamePhase::Ready;
            }
            self.after_mutation(&mut inner, None, false);
        }
        Ok(undone)
    }

    pub async fn toggle_orientation(&self) {
        let mut inner = self.inner.lock().await;
        inner.orientation = !inner.orientation;
        inner.board.toggle_orientation();
        self.fire_change(&inner);
    }

    pub async fn set_free_movement(&self, free: bool) {
        self.inner.lock().await.board.set_free_movement(free);
    }

    pub async fn set_animation(&self, enabled: bool) {
        self.inner.lock().await.board.set_animation(enabled);
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        snapshot_of(&*self.inner.lock().await)
    }

    pub async fn fen(&self) -> String {
        self.inner.lock().await.store.fen()
    }

    pub async fn turn(&self) -> Color {
        self.inner.lock().await.store.turn()
    }

    pub async fn move_number(&self) -> u32 {
        self.inner.lock().await.store.move_number()
    }

    pub async fn in_check(&self) -> bool {
        self.inner.lock().await.store.in_check()
    }

    pub async fn dests(&self) -> Dests {
        self.inner.lock().await.store.dests()
    }

    pub async fn history(&self) -> Vec<MoveRecord> {
        self.inner.lock().await.store.history().to_vec()
    }

    pub async fn game_over(&self) -> Option<GameOverInfo> {
        self.inner.lock().await.store.game_over()
    }

    pub async fn phase(&self) -> GamePhase {
        self.inner.lock().await.phase
    }

    pub async fn piece_grid(&self) -> Vec<Vec<Option<PieceAt>>> {
        self.inner.lock().await.store.piece_grid()
    }

    /// Gatekeeper for every move entry point. Resolves the thinking-engine
    /// conflict according to the move policy and returns the guard the move
    /// is applied under.
    async fn begin_move(&self) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            GamePhase::GameOver => Err(Error::GameOver),
            GamePhase::Idle | GamePhase::AwaitingEngineInit => Err(Error::EngineNotReady(
                self.engine
                    .as_ref()
                    .map(|e| e.state())
                    .unwrap_or(SearchState::Uninitialised),
            )),
            GamePhase::EngineThinking => match self.policy {
                MovePolicy::Reject => Err(Error::EngineBusy),
                MovePolicy::InterruptSearch => {
                    // Invalidate the search first, then cancel it; its reply
                    // queues on this lock and gets discarded by the epoch.
                    inner.epoch += 1;
                    inner.phase = GamePhase::Ready;
                    if let Some(engine) = &self.engine {
                        engine.stop_search().await?;
                    }
                    Ok(inner)
                }
            },
            GamePhase::Ready => Ok(inner),
        }
    }

    async fn apply_move(
        &self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
        origin: MoveOrigin,
    ) -> Result<MoveRecord> {
        let mut inner = self.begin_move().await?;
        let promotion = match promotion {
            Some(role) => Some(role),
            None if inner.store.is_promotion(from, to) => {
                Some(self.choose_promotion(to, inner.orientation).await)
            }
            None => None,
        };
        let record = inner.store.apply(from, to, promotion)?;
        if origin == MoveOrigin::Program {
            inner.board.play(record.from, record.to);
        }
        self.after_mutation(&mut inner, Some(&record), true);
        Ok(record)
    }

    async fn choose_promotion(&self, dest: Square, orientation: Color) -> Role {
        match &self.hooks.promotion {
            Some(chooser) => chooser(dest, orientation).await,
            None => Role::Queen,
        }
    }

    /// Post-mutation pipeline: phase, widget, events, engine dispatch, in
    /// that order.
    fn after_mutation(&self, inner: &mut Inner, moved: Option<&MoveRecord>, dispatch: bool) {
        inner.epoch += 1;
        if inner.store.game_over().is_some() {
            inner.phase = GamePhase::GameOver;
        }
        let view = board_view(inner);
        inner.board.refresh(&view);
        self.fire_change(inner);
        if let Some(record) = moved {
            debug!("played {} ({})", record.san, record.lan);
            for hook in &self.hooks.moved {
                hook(record);
            }
        }
        if let Some(over) = inner.store.take_announcement() {
            info!("game over: {:?} ({:?})", over.reason, over.result);
            for hook in &self.hooks.over {
                hook(&over);
            }
        }
        if dispatch {
            self.maybe_dispatch(inner);
        }
    }

    fn fire_change(&self, inner: &Inner) {
        let snapshot = snapshot_of(inner);
        for hook in &self.hooks.change {
            hook(&snapshot);
        }
    }

    fn maybe_dispatch(&self, inner: &mut Inner) {
        let Some(engine) = &self.engine else {
            return;
        };
        if inner.phase != GamePhase::Ready || !engine.color().plays(inner.store.turn()) {
            return;
        }
        self.dispatch_search(inner, engine.clone());
    }

    fn dispatch_search(&self, inner: &mut Inner, engine: UciSession) {
        inner.phase = GamePhase::EngineThinking;
        let view = board_view(inner);
        inner.board.refresh(&view);
        self.fire_change(inner);

        let fen = inner.store.fen();
        let epoch = inner.epoch;
        let game = self.clone();
        debug!("dispatching engine search for {fen}");
        tokio::spawn(async move {
            match engine.get_move(&fen).await {
                Ok(lan) => game.apply_engine_reply(epoch, &lan).await,
                Err(e) => {
                    error!("engine search failed: {e}");
                    let mut inner = game.inner.lock().await;
                    if inner.epoch == epoch && inner.phase == GamePhase::EngineThinking {
                        inner.phase = GamePhase::Ready;
                        let view = board_view(&inner);
                        inner.board.refresh(&view);
                        game.fire_change(&inner);
                    }
                }
            }
        });
    }

    async fn apply_engine_reply(&self, epoch: u64, lan: &str) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            debug!("discarding stale engine reply {lan}");
            return;
        }
        inner.phase = GamePhase::Ready;
        let (from, to, promotion) = match util::parse_uci_move(lan) {
            Ok(UciMove::Normal {
                from,
                to,
                promotion,
            }) => (from, to, promotion),
            Ok(other) => {
                error!("engine sent unplayable move '{other}'");
                return;
            }
            Err(e) => {
                error!("{e}");
                return;
            }
        };
        match inner.store.apply(from, to, promotion) {
            Ok(record) => {
                inner.board.play(record.from, record.to);
                self.after_mutation(&mut inner, Some(&record), true);
            }
            Err(e) => {
                error!("engine reply {lan} rejected: {e}");
                let view = board_view(&inner);
                inner.board.refresh(&view);
            }
        }
    }
}

fn board_view(inner: &Inner) -> BoardSync {
    let movable = (inner.phase == GamePhase::Ready).then(|| inner.store.turn());
    BoardSync {
        fen: inner.store.fen(),
        turn: inner.store.turn(),
        dests: if movable.is_some() {
            inner.store.dests()
        } else {
            Dests::new()
        },
        check: inner.store.in_check(),
        last_move: inner.store.last_move(),
        movable,
    }
}

fn snapshot_of(inner: &Inner) -> GameSnapshot {
    GameSnapshot {
        fen: inner.store.fen(),
        turn: inner.store.turn(),
        move_number: inner.store.move_number(),
        in_check: inner.store.in_check(),
        phase: inner.phase,
        game_over: inner.store.game_over(),
        last_move: inner.store.last_move(),
        history_len: inner.store.history().len(),
    }
}
