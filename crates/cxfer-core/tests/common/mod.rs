#![allow(dead_code)]

pub mod piece_server;
pub mod scripted;
