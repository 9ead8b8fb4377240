mod common;
mod deadlines;
mod domain;
mod events;
