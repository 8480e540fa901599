use shakmaty::{Color, Square};

use crate::rules::Dests;

/// Capability contract of the interactive board widget. The coordinator only
/// pushes visual state through this trait and issues the two imperative
/// commands; it never reads chess semantics back from the widget.
///
/// Interaction events travel the other way: whatever toolkit hosts the widget
/// forwards its "after user move" event to [`crate::game::Game::user_move`].
pub trait BoardWidget: Send {
    fn set_position(&mut self, fen: &str);

    fn set_turn(&mut self, color: Color);

    /// Legal destination map constraining drag targets.
    fn set_dests(&mut self, dests: &Dests);

    /// Which side may currently pick up pieces; `None` disables interaction
    /// entirely (engine thinking, game over, init pending).
    fn set_movable_color(&mut self, color: Option<Color>);

    /// Free movement mode ignores the destination map (board editor style).
    fn set_free_movement(&mut self, free: bool);

    fn set_check(&mut self, check: bool);

    fn set_last_move(&mut self, last: Option<(Square, Square)>);

    fn set_animation(&mut self, enabled: bool);

    /// Performs a move on the widget (with animation where supported).
    fn play_move(&mut self, from: Square, to: Square);

    fn toggle_orientation(&mut self);
}

/// Visual state derived by the coordinator after every mutation, mirrored
/// into the widget in one go.
#[derive(Debug, Clone)]
pub struct BoardSync {
    pub fen: String,
    pub turn: Color,
    pub dests: Dests,
    pub check: bool,
    pub last_move: Option<(Square, Square)>,
    /// `None` while interaction is disabled.
    pub movable: Option<Color>,
}

/// Translates coordinator decisions into widget configuration calls. Owns no
/// chess semantics, only the widget handle.
pub struct BoardAdapter {
    widget: Box<dyn BoardWidget>,
}

impl BoardAdapter {
    pub fn new(widget: Box<dyn BoardWidget>) -> BoardAdapter {
        BoardAdapter { widget }
    }

    pub fn refresh(&mut self, view: &BoardSync) {
        self.widget.set_position(&view.fen);
        self.widget.set_turn(view.turn);
        self.widget.set_check(view.check);
        self.widget.set_last_move(view.last_move);
        self.widget.set_movable_color(view.movable);
        self.widget.set_dests(&view.dests);
    }

    /// Animates a move that did not originate from the widget itself
    /// (programmatic or engine moves).
    pub fn play(&mut self, from: Square, to: Square) {
        self.widget.play_move(from, to);
    }

    pub fn toggle_orientation(&mut self) {
        self.widget.toggle_orientation();
    }

    pub fn set_free_movement(&mut self, free: bool) {
        self.widget.set_free_movement(free);
    }

    pub fn set_animation(&mut self, enabled: bool) {
        self.widget.set_animation(enabled);
    }
}

/// Default no-op widget for headless use (tests, server-side games).
#[derive(Default)]
pub struct NullBoard;

impl BoardWidget for NullBoard {
    fn set_position(&mut self, _fen: &str) {}
    fn set_turn(&mut self, _color: Color) {}
    fn set_dests(&mut self, _dests: &Dests) {}
    fn set_movable_color(&mut self, _color: Option<Color>) {}
    fn set_free_movement(&mut self, _free: bool) {}
    fn set_check(&mut self, _check: bool) {}
    fn set_last_move(&mut self, _last: Option<(Square, Square)>) {}
    fn set_animation(&mut self, _enabled: bool) {}
    fn play_move(&mut self, _from: Square, _to: Square) {}
    fn toggle_orientation(&mut self) {}
}
