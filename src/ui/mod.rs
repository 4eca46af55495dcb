pub mod controls;
pub mod notifications;
pub mod render;
pub mod spectrogram;
pub mod theme;
pub mod visual;
