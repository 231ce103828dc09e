//! Colour table — maps each byte value to the RGB used in the aerial view.
//!
//! An aerial worker takes a copy of the table when it is created; changing
//! the colour scheme means tearing the aerial subsystem down and building a
//! new one, never patching a live worker.

/// A 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColourTable {
    entries: [Rgb; 256],
}

impl ColourTable {
    pub fn from_fn(mut f: impl FnMut(u8) -> Rgb) -> Self {
        let mut entries = [Rgb::default(); 256];
        for (value, entry) in entries.iter_mut().enumerate() {
            *entry = f(value as u8);
        }
        Self { entries }
    }

    /// Black for 0x00 through white for 0xFF.
    pub fn greyscale() -> Self {
        Self::from_fn(|v| Rgb::new(v, v, v))
    }

    #[inline]
    pub fn colour_of(&self, value: u8) -> Rgb {
        self.entries[value as usize]
    }
}

impl Default for ColourTable {
    /// Groups bytes by class so text, binary and padding regions stand out.
    fn default() -> Self {
        Self::from_fn(|v| match v {
            0x00 => Rgb::new(0x00, 0x00, 0x00),
            0x01..=0x1F | 0x7F => Rgb::new(0x80, 0x40, 0x40),
            b' ' => Rgb::new(0xF0, 0xF0, 0xD0),
            b'0'..=b'9' => Rgb::new(0x40, 0x80, 0xFF),
            b'A'..=b'Z' | b'a'..=b'z' => Rgb::new(0x30, 0xB0, 0x30),
            0x21..=0x7E => Rgb::new(0xA0, 0x60, 0xC0),
            0xFF => Rgb::new(0xFF, 0xFF, 0xFF),
            // High bytes shade from dark to light orange.
            _ => {
                let level = v - 0x80;
                Rgb::new(0x80 + level / 2, 0x40 + level / 4, 0x00)
            }
        })
    }
}
