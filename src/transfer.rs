//! SPI messages and their segments

use crate::dma::{Direction, Dma};
use crate::{Error, Result};
use heapless::Vec;

/// Most segments in one message
pub const MAX_SEGMENTS: usize = 8;

/// One directional or bidirectional movement of `len` bytes
///
/// Buffers are addresses. With a transmit buffer, the controller clocks it
/// out; with a receive buffer, it fills it with what the device sends back.
/// A segment needs at least one of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    tx: Option<u32>,
    rx: Option<u32>,
    len: u32,
    /// Bus addresses, valid while the message is queued
    pub(crate) tx_bus: Option<u32>,
    pub(crate) rx_bus: Option<u32>,
}

impl Segment {
    pub const fn new(tx: Option<u32>, rx: Option<u32>, len: u32) -> Self {
        Segment {
            tx,
            rx,
            len,
            tx_bus: None,
            rx_bus: None,
        }
    }

    /// Transmit only
    pub const fn write(tx: u32, len: u32) -> Self {
        Self::new(Some(tx), None, len)
    }

    /// Receive only
    pub const fn read(rx: u32, len: u32) -> Self {
        Self::new(None, Some(rx), len)
    }

    /// Transmit and receive at the same time
    pub const fn duplex(tx: u32, rx: u32, len: u32) -> Self {
        Self::new(Some(tx), Some(rx), len)
    }

    pub const fn tx(&self) -> Option<u32> {
        self.tx
    }

    pub const fn rx(&self) -> Option<u32> {
        self.rx
    }

    pub const fn len(&self) -> u32 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) const fn is_valid(&self) -> bool {
        (self.tx.is_some() || self.rx.is_some()) && self.len > 0
    }

    pub(crate) const fn is_duplex(&self) -> bool {
        self.tx_bus.is_some() && self.rx_bus.is_some()
    }

    /// Use the buffer addresses as bus addresses
    pub(crate) fn assume_mapped(&mut self) {
        self.tx_bus = self.tx;
        self.rx_bus = self.rx;
    }

    pub(crate) fn map<D: Dma + ?Sized>(&mut self, dma: &mut D) -> Result<()> {
        if let Some(tx) = self.tx {
            self.tx_bus = Some(dma.map(tx, self.len, Direction::ToDevice)?);
        }
        if let Some(rx) = self.rx {
            match dma.map(rx, self.len, Direction::FromDevice) {
                Ok(bus) => self.rx_bus = Some(bus),
                Err(err) => {
                    self.unmap(dma);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Release whatever [`map`](Segment::map) mapped; repeat calls do nothing
    pub(crate) fn unmap<D: Dma + ?Sized>(&mut self, dma: &mut D) {
        if let Some(bus) = self.tx_bus.take() {
            dma.unmap(bus, self.len, Direction::ToDevice);
        }
        if let Some(bus) = self.rx_bus.take() {
            dma.unmap(bus, self.len, Direction::FromDevice);
        }
    }
}

/// How a message ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// The device the message addressed
    pub device: u8,
    pub status: Result<()>,
    /// Bytes transferred across all finished segments
    pub actual_length: u32,
}

/// Runs once when a message finishes
///
/// The engine calls `complete` outside its critical section, so a
/// completion may submit another message.
pub trait Complete {
    fn complete(self, outcome: Outcome);
}

impl<F> Complete for F
where
    F: FnOnce(Outcome),
{
    fn complete(self, outcome: Outcome) {
        self(outcome)
    }
}

/// An ordered list of segments for one device
///
/// Segments run back to back with the device selected throughout. The
/// completion `C` runs exactly once, whether the message finishes, fails,
/// or is drained at shutdown.
pub struct Message<C> {
    pub(crate) device: u8,
    pub(crate) segments: Vec<Segment, MAX_SEGMENTS>,
    pub(crate) dma_mapped: bool,
    pub(crate) complete: C,
    pub(crate) actual_length: u32,
}

impl<C> Message<C> {
    /// An empty message; add segments with [`push`](Message::push)
    pub fn new(device: u8, complete: C) -> Self {
        Message {
            device,
            segments: Vec::new(),
            dma_mapped: false,
            complete,
            actual_length: 0,
        }
    }

    /// A message holding a copy of `segments`
    ///
    /// Fails with [`NoResources`](Error::NoResources) if there are more than
    /// [`MAX_SEGMENTS`].
    pub fn with_segments(device: u8, segments: &[Segment], complete: C) -> Result<Self> {
        let mut message = Self::new(device, complete);
        message.segments = Vec::from_slice(segments).map_err(|_| Error::NoResources)?;
        Ok(message)
    }

    pub fn push(&mut self, segment: Segment) -> Result<()> {
        self.segments
            .push(segment)
            .map_err(|_| Error::NoResources)
    }

    /// Declare that segment buffers are already bus addresses
    ///
    /// The engine then skips mapping and unmapping.
    #[must_use]
    pub fn dma_mapped(mut self, mapped: bool) -> Self {
        self.dma_mapped = mapped;
        self
    }

    pub fn device(&self) -> u8 {
        self.device
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total bytes across all segments
    pub fn len(&self) -> u32 {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(Segment::is_valid)
    }

    pub(crate) fn unmap<D: Dma + ?Sized>(&mut self, dma: &mut D) {
        if !self.dma_mapped {
            for segment in self.segments.iter_mut() {
                segment.unmap(dma);
            }
        }
    }

    /// Map every segment, or none of them
    pub(crate) fn map<D: Dma + ?Sized>(&mut self, dma: &mut D) -> Result<()> {
        if self.dma_mapped {
            self.segments.iter_mut().for_each(Segment::assume_mapped);
            return Ok(());
        }
        for index in 0..self.segments.len() {
            if let Err(err) = self.segments[index].map(dma) {
                for segment in self.segments[..index].iter_mut() {
                    segment.unmap(dma);
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_needs_a_buffer_and_a_length() {
        assert!(Segment::write(0x1000, 4).is_valid());
        assert!(Segment::read(0x1000, 4).is_valid());
        assert!(!Segment::new(None, None, 4).is_valid());
        assert!(!Segment::write(0x1000, 0).is_valid());
    }

    #[test]
    fn message_validation() {
        let empty = Message::new(0, |_: Outcome| {});
        assert!(!empty.is_valid());

        let mut message = Message::new(0, |_: Outcome| {});
        message.push(Segment::write(0x1000, 4)).unwrap();
        message.push(Segment::duplex(0x2000, 0x3000, 8)).unwrap();
        assert!(message.is_valid());
        assert_eq!(message.len(), 12);

        message.push(Segment::new(None, None, 1)).unwrap();
        assert!(!message.is_valid());
    }

    #[test]
    fn segment_list_is_bounded() {
        let segments = [Segment::write(0x1000, 1); MAX_SEGMENTS + 1];
        assert!(matches!(
            Message::with_segments(0, &segments, |_: Outcome| {}),
            Err(Error::NoResources)
        ));
        let mut message = Message::with_segments(0, &segments[1..], |_: Outcome| {}).unwrap();
        assert_eq!(message.push(Segment::write(0x1000, 1)), Err(Error::NoResources));
    }
}
