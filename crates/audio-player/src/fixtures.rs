//! Small, valid encoded streams for decoder and engine tests.
//!
//! Each builder emits the simplest legal encoding of a ramp (or, for Vorbis,
//! silence): verbatim FLAC subframes, uncompressed ALAC elements and a Vorbis
//! setup with one codebook and unused floors. The frame counts they decode to
//! are fixed by the arguments.

use crate::decode::StreamFormat;

/// Frames each Vorbis audio packet after the first decodes to (256-sample blocks).
pub const VORBIS_FRAMES_PER_PACKET: usize = 128;

/// Sample value written for `frame` of `channel`. Never produces a FLAC sync byte.
pub fn ramp_sample(frame: usize, channel: usize) -> i16 {
    (((frame + channel * 7) % 64) * 4) as i16
}

/// A complete FLAC stream: STREAMINFO followed by `blocks` fixed-size frames.
pub fn flac_fragment(format: StreamFormat, block_frames: u16, blocks: usize) -> Vec<u8> {
    assert!(block_frames >= 16, "flac blocks hold at least 16 frames");
    assert!((1..=8).contains(&format.channels));

    let mut out = b"fLaC".to_vec();
    // Last metadata block, type STREAMINFO, 34 bytes.
    out.extend_from_slice(&[0x80, 0x00, 0x00, 34]);
    out.extend_from_slice(&block_frames.to_be_bytes());
    out.extend_from_slice(&block_frames.to_be_bytes());
    out.extend_from_slice(&[0; 6]);
    let mut info = MsbBits::default();
    info.put(u64::from(format.sample_rate), 20);
    info.put(format.channels as u64 - 1, 3);
    info.put(15, 5);
    info.put(blocks as u64 * u64::from(block_frames), 36);
    out.extend_from_slice(&info.finish());
    out.extend_from_slice(&[0; 16]);

    for block in 0..blocks {
        out.extend_from_slice(&flac_frame(format.channels, block_frames, block));
    }
    out
}

fn flac_frame(channels: usize, block_frames: u16, index: usize) -> Vec<u8> {
    // Fixed blocking, 16-bit block size follows, rate from STREAMINFO,
    // independent channels, 16 bits per sample.
    let mut frame = vec![0xff, 0xf8, 0x70, (((channels - 1) as u8) << 4) | 0x08];
    frame.extend_from_slice(&utf8_number(index as u32));
    frame.extend_from_slice(&(block_frames - 1).to_be_bytes());
    frame.push(crc8(&frame));

    let first = index * usize::from(block_frames);
    let mut bits = MsbBits::default();
    for channel in 0..channels {
        // Zero pad bit, VERBATIM subframe type, no wasted bits.
        bits.put(0b0000_0010, 8);
        for i in 0..usize::from(block_frames) {
            bits.put(u64::from(ramp_sample(first + i, channel) as u16), 16);
        }
    }
    frame.extend_from_slice(&bits.finish());
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

fn utf8_number(n: u32) -> Vec<u8> {
    match n {
        0..=0x7f => vec![n as u8],
        0x80..=0x7ff => vec![0xc0 | (n >> 6) as u8, 0x80 | (n & 0x3f) as u8],
        _ => vec![
            0xe0 | ((n >> 12) & 0x0f) as u8,
            0x80 | ((n >> 6) & 0x3f) as u8,
            0x80 | (n & 0x3f) as u8,
        ],
    }
}

/// The 24-byte ALAC magic cookie for 16-bit audio.
pub fn alac_cookie(format: StreamFormat, frame_length: u32) -> Vec<u8> {
    let mut cookie = Vec::with_capacity(24);
    cookie.extend_from_slice(&frame_length.to_be_bytes());
    // compatible version, bit depth, pb, mb, kb
    cookie.extend_from_slice(&[0, 16, 40, 10, 14]);
    cookie.push(format.channels as u8);
    cookie.extend_from_slice(&255u16.to_be_bytes());
    cookie.extend_from_slice(&0u32.to_be_bytes());
    cookie.extend_from_slice(&0u32.to_be_bytes());
    cookie.extend_from_slice(&format.sample_rate.to_be_bytes());
    cookie
}

/// One ALAC packet of `frames` uncompressed frames, flagged as a partial frame
/// so its length does not have to match the cookie.
pub fn alac_packet(format: StreamFormat, frames: u32) -> Vec<u8> {
    const SCE: u64 = 0;
    const CPE: u64 = 1;
    const END: u64 = 7;

    let mut bits = MsbBits::default();
    let mut channel = 0;
    while channel < format.channels {
        let pair = format.channels - channel >= 2;
        bits.put(if pair { CPE } else { SCE }, 3);
        bits.put(0, 4); // element instance
        bits.put(0, 12);
        bits.put(1, 1); // partial frame
        bits.put(0, 2); // no shift
        bits.put(1, 1); // uncompressed
        bits.put(u64::from(frames), 32);
        let width = if pair { 2 } else { 1 };
        for i in 0..frames as usize {
            for c in channel..channel + width {
                bits.put(u64::from(ramp_sample(i, c) as u16), 16);
            }
        }
        channel += width;
    }
    bits.put(END, 3);
    bits.finish()
}

/// A complete Ogg/Vorbis stream of `packets` silent audio packets.
///
/// Decodes to `(packets - 1) * VORBIS_FRAMES_PER_PACKET` frames: the first
/// packet only primes the overlap.
pub fn vorbis_fragment(format: StreamFormat, packets: usize) -> Vec<u8> {
    const SERIAL: u32 = 0x5241_4449;

    let mut ident = vec![0x01];
    ident.extend_from_slice(b"vorbis");
    ident.extend_from_slice(&0u32.to_le_bytes());
    ident.push(format.channels as u8);
    ident.extend_from_slice(&format.sample_rate.to_le_bytes());
    ident.extend_from_slice(&[0; 12]); // bitrates
    ident.push(0x88); // both block sizes 256
    ident.push(0x01);

    let mut comment = vec![0x03];
    comment.extend_from_slice(b"vorbis");
    comment.extend_from_slice(&0u32.to_le_bytes());
    comment.extend_from_slice(&0u32.to_le_bytes());
    comment.push(0x01);

    let audio: Vec<Vec<u8>> = (0..packets).map(|_| vec![0x00]).collect();
    let granule = (packets.saturating_sub(1) * VORBIS_FRAMES_PER_PACKET) as u64;

    let mut out = ogg_page(0x02, 0, SERIAL, 0, &[ident]);
    out.extend_from_slice(&ogg_page(0, 0, SERIAL, 1, &[comment, vorbis_setup()]));
    out.extend_from_slice(&ogg_page(0x04, granule, SERIAL, 2, &audio));
    out
}

fn vorbis_setup() -> Vec<u8> {
    let mut bits = LsbBits::default();
    // One codebook: scalar, two entries of length 1, no lookup.
    bits.put(0, 8);
    bits.put(0x56_4342, 24);
    bits.put(1, 16);
    bits.put(2, 24);
    bits.put(0, 1);
    bits.put(0, 1);
    bits.put(0, 5);
    bits.put(0, 5);
    bits.put(0, 4);
    // One placeholder time domain transform.
    bits.put(0, 6);
    bits.put(0, 16);
    // One floor 1 without partitions.
    bits.put(0, 6);
    bits.put(1, 16);
    bits.put(0, 5);
    bits.put(1, 2);
    bits.put(8, 4);
    // One empty residue 0.
    bits.put(0, 6);
    bits.put(0, 16);
    bits.put(0, 24);
    bits.put(0, 24);
    bits.put(0, 24);
    bits.put(0, 6);
    bits.put(0, 8);
    bits.put(0, 3);
    bits.put(0, 1);
    // One mapping: single submap, no coupling.
    bits.put(0, 6);
    bits.put(0, 16);
    bits.put(0, 1);
    bits.put(0, 1);
    bits.put(0, 2);
    bits.put(0, 8);
    bits.put(0, 8);
    bits.put(0, 8);
    // One short-block mode.
    bits.put(0, 6);
    bits.put(0, 1);
    bits.put(0, 16);
    bits.put(0, 16);
    bits.put(0, 8);
    // Framing.
    bits.put(1, 1);

    let mut setup = vec![0x05];
    setup.extend_from_slice(b"vorbis");
    setup.extend_from_slice(&bits.finish());
    setup
}

fn ogg_page(flags: u8, granule: u64, serial: u32, sequence: u32, packets: &[Vec<u8>]) -> Vec<u8> {
    let mut lacing = Vec::new();
    for packet in packets {
        lacing.extend(std::iter::repeat_n(255u8, packet.len() / 255));
        lacing.push((packet.len() % 255) as u8);
    }
    assert!(lacing.len() <= 255, "too many segments for one page");

    let mut page = b"OggS".to_vec();
    page.push(0);
    page.push(flags);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    for packet in packets {
        page.extend_from_slice(packet);
    }
    let crc = ogg_crc(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

/// Bit packer, most significant bit first (FLAC, ALAC).
#[derive(Default)]
struct MsbBits {
    out: Vec<u8>,
    cur: u8,
    used: u32,
}

impl MsbBits {
    fn put(&mut self, value: u64, bits: u32) {
        for i in (0..bits).rev() {
            self.cur = (self.cur << 1) | ((value >> i) & 1) as u8;
            self.used += 1;
            if self.used == 8 {
                self.out.push(self.cur);
                self.cur = 0;
                self.used = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.out.push(self.cur << (8 - self.used));
        }
        self.out
    }
}

/// Bit packer, least significant bit first (Vorbis).
#[derive(Default)]
struct LsbBits {
    out: Vec<u8>,
    cur: u8,
    used: u32,
}

impl LsbBits {
    fn put(&mut self, value: u64, bits: u32) {
        for i in 0..bits {
            self.cur |= (((value >> i) & 1) as u8) << self.used;
            self.used += 1;
            if self.used == 8 {
                self.out.push(self.cur);
                self.cur = 0;
                self.used = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.out.push(self.cur);
        }
        self.out
    }
}

fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
        }
    }
    crc
}

fn ogg_crc(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04c1_1db7 } else { crc << 1 };
        }
    }
    crc
}
