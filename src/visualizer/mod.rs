pub mod tui;
pub mod view;
