use std::sync::mpsc::Sender;
use std::thread;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use ratatui::layout::Rect;
use ratatui_image::picker::Picker;
use ratatui_image::protocol::StatefulProtocol;
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::config::SpectrogramConfig;
use crate::events::types::AppEvent;
use crate::media::source::MediaLocation;
use crate::ui::spectrogram;

/// Render the spectrogram for playlist `item` in the background. The result
/// arrives as `SpectrogramReady` or `SpectrogramFailed`.
pub fn request(
    client: Client,
    location: MediaLocation,
    config: SpectrogramConfig,
    item: usize,
    event_tx: Sender<AppEvent>,
) {
    thread::spawn(move || {
        debug!(item, %location, "rendering spectrogram");
        let event = match spectrogram::build(&client, &location, config) {
            Ok(image) => AppEvent::SpectrogramReady { item, image },
            Err(error) => {
                warn!(item, %error, "spectrogram failed");
                AppEvent::SpectrogramFailed { item, error }
            }
        };
        let _ = event_tx.send(event);
    });
}

/// Holds the current spectrogram and the terminal image built from it.
/// The image is stretched to exactly fill the cells it is drawn in, so a
/// column offset maps linearly onto the timeline.
pub struct ImageCache {
    picker: Picker,
    source: Option<RgbaImage>,
    protocol: Option<StatefulProtocol>,
    area: Option<Rect>,
}

impl ImageCache {
    pub fn new(picker: Picker) -> Self {
        Self {
            picker,
            source: None,
            protocol: None,
            area: None,
        }
    }

    pub fn set(&mut self, image: RgbaImage) {
        self.source = Some(image);
        self.protocol = None;
        self.area = None;
    }

    pub fn clear(&mut self) {
        self.source = None;
        self.protocol = None;
        self.area = None;
    }

    /// The protocol to draw into `area`, rebuilt whenever the area changes.
    pub fn protocol_for(&mut self, area: Rect) -> Option<&mut StatefulProtocol> {
        let source = self.source.as_ref()?;
        if area.width == 0 || area.height == 0 {
            return None;
        }

        if self.area != Some(area) || self.protocol.is_none() {
            let (font_w, font_h) = self.picker.font_size();
            let width = u32::from(area.width) * u32::from(font_w.max(1));
            let height = u32::from(area.height) * u32::from(font_h.max(1));

            let resized = imageops::resize(source, width, height, FilterType::Triangle);
            self.protocol = Some(
                self.picker
                    .new_resize_protocol(DynamicImage::ImageRgba8(resized)),
            );
            self.area = Some(area);
        }

        self.protocol.as_mut()
    }
}
