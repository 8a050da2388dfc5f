//! Image generation.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use anyhow::Result;
use mkimage::{Identity, ImageBuilder};

pub struct GeneratedImage {
    /// Header and payload, ready to stream or install.
    pub data: Vec<u8>,
    /// The payload alone.
    pub payload: Vec<u8>,
    pub crc: u16,
}

pub struct GenBuilder {
    /// Size of the header, in address units.
    header_size: u32,
    /// Size of the payload, in bytes.
    size: usize,
    /// Seed for the PRNG
    seed: u64,
    words: bool,
    identity: Identity,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            header_size: 256,
            size: 76_137,
            seed: 1,
            words: false,
            identity: Identity::default(),
        }
    }
}

impl GenBuilder {
    pub fn header_size(&mut self, header_size: u32) -> &mut Self {
        self.header_size = header_size;
        self
    }

    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    /// Generate a word mode image.  The size must be even.
    pub fn words(&mut self, words: bool) -> &mut Self {
        self.words = words;
        self
    }

    pub fn identity(&mut self, vendor_id: u32, product_code: u32) -> &mut Self {
        self.identity = Identity {
            vendor_id: Some(vendor_id),
            product_code: Some(product_code),
            ..Identity::default()
        };
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let mut payload = vec![0u8; self.size];
        rng.fill_bytes(&mut payload);

        let image = ImageBuilder::new(self.header_size)
            .words(self.words)
            .identity(self.identity)
            .build(&payload)?;

        Ok(GeneratedImage {
            data: image.data,
            payload,
            crc: image.header.crc,
        })
    }
}
