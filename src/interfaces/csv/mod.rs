pub mod authorization_writer;
pub mod command_reader;
