pub mod helpers;
mod tests_sequencer;
