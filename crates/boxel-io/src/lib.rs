//! boxel-io — PLY frame reader/writer (ASCII) and JSONL session streams.

use anyhow::{bail, Context, Result};
use boxel_core::DepthFrame;
use log::info;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Ply};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};

pub fn read_ply_ascii(path: &str) -> Result<DepthFrame> {
    let f = File::open(path).with_context(|| format!("open {}", path))?;
    let mut reader = BufReader::new(f);
    let parser = Parser::<DefaultElement>::new();
    let ply: Ply<DefaultElement> = parser.read_ply(&mut reader)?;

    // Expect "vertex" element with float x,y,z; confidence optional.
    let vertex = ply
        .payload
        .get("vertex")
        .ok_or_else(|| anyhow::anyhow!("PLY missing 'vertex' element"))?;

    let mut frame = DepthFrame::default();
    frame.reserve(vertex.len());
    for el in vertex {
        let x = get_f32(el, "x")?;
        let y = get_f32(el, "y")?;
        let z = get_f32(el, "z")?;
        // frames written before confidence existed are treated as trusted
        let conf = get_f32(el, "confidence").unwrap_or(1.0);
        frame.push(x, y, z, conf);
    }
    Ok(frame)
}

fn get_f32(el: &DefaultElement, key: &str) -> Result<f32> {
    match el.get(key) {
        Some(ply_rs::ply::Property::Float(v)) => Ok(*v),
        Some(ply_rs::ply::Property::Double(v)) => Ok(*v as f32),
        Some(ply_rs::ply::Property::UChar(v)) => Ok(*v as f32),
        Some(_) => bail!("property '{}' not float-like", key),
        None => bail!("missing property '{}'", key),
    }
}

pub fn write_ply_ascii(path: &str, frame: &DepthFrame) -> Result<()> {
    let f = File::create(path).with_context(|| format!("create {}", path))?;
    let mut w = BufWriter::new(f);

    writeln!(w, "ply")?;
    writeln!(w, "format ascii 1.0")?;
    writeln!(w, "element vertex {}", frame.len())?;
    for k in ["x", "y", "z", "confidence"] {
        writeln!(w, "property float {}", k)?;
    }
    writeln!(w, "end_header")?;

    for i in 0..frame.len() {
        writeln!(
            w,
            "{} {} {} {}",
            frame.x[i], frame.y[i], frame.z[i], frame.confidence[i]
        )?;
    }
    Ok(())
}

pub fn read_auto(path: &str) -> Result<DepthFrame> {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".ply") {
        return read_ply_ascii(path);
    }
    bail!("unsupported file '{}' (expected .ply)", path)
}

/// Appends one JSON-encoded frame per line to a session stream.
pub struct FrameRecorder {
    w: BufWriter<File>,
    frames: usize,
}

impl FrameRecorder {
    pub fn create(path: &str) -> Result<Self> {
        let f = File::create(path).with_context(|| format!("create {}", path))?;
        info!("recording session to {}", path);
        Ok(Self { w: BufWriter::new(f), frames: 0 })
    }

    pub fn record(&mut self, frame: &DepthFrame) -> Result<()> {
        serde_json::to_writer(&mut self.w, frame)?;
        self.w.write_all(b"\n")?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> usize { self.frames }

    /// Flush and close, returning how many frames were written.
    pub fn finish(mut self) -> Result<usize> {
        self.w.flush()?;
        Ok(self.frames)
    }
}

/// Streams frames back from a session file, in recording order.
pub struct FrameReplayer {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl FrameReplayer {
    pub fn open(path: &str) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("open {}", path))?;
        Ok(Self { lines: BufReader::new(f).lines(), line_no: 0 })
    }

    /// Next recorded frame, or None at end of stream. A malformed line is an
    /// error for that frame only; the stream keeps advancing.
    pub fn next_frame(&mut self) -> Result<Option<DepthFrame>> {
        loop {
            self.line_no += 1;
            match self.lines.next() {
                None => return Ok(None),
                Some(line) => {
                    let line = line.with_context(|| format!("read line {}", self.line_no))?;
                    if line.trim().is_empty() { continue; }
                    let frame = serde_json::from_str(&line)
                        .with_context(|| format!("decode frame at line {}", self.line_no))?;
                    return Ok(Some(frame));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("boxel-io-{}-{}", std::process::id(), name))
            .to_string_lossy()
            .into_owned()
    }

    fn sample_frame() -> DepthFrame {
        let mut f = DepthFrame::default();
        f.push(0.1, -0.2, 1.5, 0.9);
        f.push(0.0, 0.0, 2.0, 0.25);
        f
    }

    #[test]
    fn ply_preserves_positions_and_confidence() {
        let path = tmp("frame.ply");
        let f = sample_frame();
        write_ply_ascii(&path, &f).unwrap();
        let back = read_ply_ascii(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.x, f.x);
        assert_eq!(back.confidence, f.confidence);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn session_replays_frames_in_recording_order() {
        let path = tmp("session.jsonl");
        let mut rec = FrameRecorder::create(&path).unwrap();
        rec.record(&sample_frame()).unwrap();
        let mut second = DepthFrame::default();
        second.push(9.0, 9.0, 9.0, 1.0);
        rec.record(&second).unwrap();
        assert_eq!(rec.finish().unwrap(), 2);

        let mut rep = FrameReplayer::open(&path).unwrap();
        let a = rep.next_frame().unwrap().unwrap();
        assert_eq!(a.len(), 2);
        let b = rep.next_frame().unwrap().unwrap();
        assert_eq!(b.x, vec![9.0]);
        assert!(rep.next_frame().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn read_auto_rejects_unknown_extension() {
        assert!(read_auto("frames.mp4").is_err());
    }
}
