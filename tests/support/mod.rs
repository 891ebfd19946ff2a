#![allow(dead_code)]

pub mod ranges;
pub mod socket_guard;
