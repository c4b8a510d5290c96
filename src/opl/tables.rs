//! OPL2 Lookup Tables
//!
//! The YM3812 never multiplies: a sample is produced by looking up the
//! logarithm of a quarter sine, adding the attenuation in the log domain and
//! converting back through an exponent table. Both ROMs are rebuilt here at
//! start-up from their closed forms.

use std::f64::consts::PI;
use std::sync::OnceLock;

/// Key scale level ROM, indexed by the top four F-number bits
pub const KSL_ROM: [u8; 16] = [0, 32, 40, 45, 48, 51, 53, 55, 56, 58, 59, 60, 61, 62, 63, 64];

/// Right-shift applied to the key scale level for KSL settings 0..=3
/// (0, 3, 1.5 and 6 dB per octave)
pub const KSL_SHIFT: [u8; 4] = [8, 1, 2, 0];

/// Frequency multiplier table, doubled so MULT=0 (x0.5) stays integral
pub const MULT_X2: [u32; 16] = [1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 20, 24, 24, 30, 30];

/// Maximum envelope attenuation (9-bit, 0.1875 dB steps)
pub const ENV_MAX: u16 = 0x1FF;

/// Log-sin and exponent ROMs
#[derive(Debug)]
pub struct Tables {
    /// -log2(sin) of a quarter wave, 8.8 fixed point
    pub log_sin: [u16; 256],
    /// 2^x mantissa, 10 bits plus implied leading one
    pub exp: [u16; 256],
}

impl Tables {
    fn build() -> Self {
        let mut log_sin = [0u16; 256];
        let mut exp = [0u16; 256];
        for i in 0..256 {
            let angle = (i as f64 + 0.5) * PI / 512.0;
            log_sin[i] = (-angle.sin().log2() * 256.0).round() as u16;
            exp[i] = ((2f64.powf((255 - i) as f64 / 256.0)) * 1024.0).round() as u16;
        }
        Tables { log_sin, exp }
    }

    /// Shared table instance
    pub fn get() -> &'static Tables {
        static TABLES: OnceLock<Tables> = OnceLock::new();
        TABLES.get_or_init(Tables::build)
    }

    /// Convert a log-domain attenuation into a linear 13-bit magnitude
    #[inline]
    pub fn calc_exp(&self, level: u32) -> i32 {
        if level > 0x1FFF {
            return 0;
        }
        (((self.exp[(level & 0xFF) as usize] as u32) << 1) >> (level >> 8)) as i32
    }

    /// Look up the log-sin value for a 10-bit phase within the half wave
    #[inline]
    fn quarter(&self, phase: u32) -> u32 {
        if phase & 0x100 != 0 {
            self.log_sin[(!phase & 0xFF) as usize] as u32
        } else {
            self.log_sin[(phase & 0xFF) as usize] as u32
        }
    }

    /// Evaluate one of the four OPL2 waveforms at a 10-bit phase.
    ///
    /// `envelope` is the total attenuation (envelope, total level, key scale
    /// and tremolo) in 0.1875 dB steps.
    pub fn waveform(&self, waveform: u8, phase: u32, envelope: u32) -> i32 {
        let phase = phase & 0x3FF;
        let negative = phase & 0x200 != 0;
        let atten = envelope << 3;
        match waveform & 3 {
            // Sine
            0 => {
                let out = self.calc_exp(self.quarter(phase) + atten);
                if negative {
                    -out
                } else {
                    out
                }
            }
            // Half sine
            1 => {
                if negative {
                    0
                } else {
                    self.calc_exp(self.quarter(phase) + atten)
                }
            }
            // Absolute sine
            2 => self.calc_exp(self.quarter(phase) + atten),
            // Quarter sine (pulse)
            _ => {
                if phase & 0x100 != 0 {
                    0
                } else {
                    self.calc_exp(self.log_sin[(phase & 0xFF) as usize] as u32 + atten)
                }
            }
        }
    }
}
