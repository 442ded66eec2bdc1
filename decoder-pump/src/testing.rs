//! Scripted in-memory decoder used by the unit tests.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::device::{BufferId, DecoderDevice, InputRegion, OutputBuffer};
use crate::format::DecoderFormat;
use crate::unit::CodecFlags;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub id: BufferId,
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: CodecFlags,
}

#[derive(Default)]
pub struct MockState {
    /// Empty input buffers the device will hand out, in order.
    pub available: VecDeque<BufferId>,
    /// Submitted buffers go back to `available` right away.
    pub recycle: bool,
    /// Every submission produces one output buffer.
    pub auto_output: bool,
    pub outputs: VecDeque<OutputBuffer>,
    pub submissions: Vec<Submission>,
    pub released: Vec<(OutputBuffer, bool)>,
    pub configured: Option<DecoderFormat>,
    pub starts: usize,
    pub stops: usize,
    pub drops: usize,
    pub fail_configure: bool,
    pub fail_submit: bool,
    pub dequeue_calls: usize,
}

#[derive(Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.0.lock().submissions.clone()
    }

    pub fn make_available(&self, id: BufferId) {
        self.0.lock().available.push_back(id);
    }
}

pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    memory: Vec<Box<[u8]>>,
    next_output: usize,
}

impl MockDevice {
    pub fn new(buffers: usize, capacity: usize) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            available: (0..buffers).collect(),
            recycle: true,
            auto_output: true,
            ..Default::default()
        }));
        let device = Self {
            state: state.clone(),
            memory: (0..buffers)
                .map(|_| vec![0u8; capacity].into_boxed_slice())
                .collect(),
            next_output: 0,
        };
        (device, MockHandle(state))
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.state.lock().drops += 1;
    }
}

impl DecoderDevice for MockDevice {
    type Surface = ();

    fn open(codec_name: &str, _mime_type: &str) -> anyhow::Result<Self> {
        if codec_name == "missing" {
            anyhow::bail!("no decoder named {}", codec_name);
        }
        Ok(Self::new(1, 4096).0)
    }

    fn configure(&mut self, format: &DecoderFormat, _surface: Option<&()>) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_configure {
            anyhow::bail!("format rejected");
        }
        state.configured = Some(format.clone());
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.state.lock().starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.state.lock().stops += 1;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> anyhow::Result<Option<BufferId>> {
        let mut state = self.state.lock();
        state.dequeue_calls += 1;
        Ok(state.available.pop_front())
    }

    fn input_region(&mut self, id: BufferId) -> anyhow::Result<InputRegion> {
        let buffer = self
            .memory
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("unknown input buffer {}", id))?;
        let ptr = NonNull::new(buffer.as_mut_ptr())
            .ok_or_else(|| anyhow::anyhow!("zero sized input buffer {}", id))?;
        Ok(unsafe { InputRegion::from_raw_parts(ptr, buffer.len()) })
    }

    fn submit_input(
        &mut self,
        id: BufferId,
        len: usize,
        pts_us: i64,
        flags: CodecFlags,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_submit {
            anyhow::bail!("device lost");
        }
        let data = self.memory[id][..len].to_vec();
        state.submissions.push(Submission {
            id,
            data,
            pts_us,
            flags,
        });
        if state.recycle {
            state.available.push_back(id);
        }
        if state.auto_output {
            state.outputs.push_back(OutputBuffer {
                id: self.next_output,
                pts_us,
                flags,
            });
            self.next_output += 1;
        }
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> anyhow::Result<Option<OutputBuffer>> {
        Ok(self.state.lock().outputs.pop_front())
    }

    fn release_output(&mut self, output: OutputBuffer, render: bool) -> anyhow::Result<()> {
        self.state.lock().released.push((output, render));
        Ok(())
    }
}
