//! Local capture, outbound track control, inbound feeds and recording.

pub mod capture;
pub mod codec;
pub mod controller;
pub mod mixer;
pub mod recording;
pub mod remote;
pub mod track;
