// Command buffer recording
//
// Every buffer carries its recording state through a single transition
// table, so misuse surfaces as a typed error at the call site instead of
// a validation message later.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Lifecycle of a recorded command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    NotAllocated,
    Ready,
    Recording,
    InRenderPass,
    RecordingEnded,
    Submitted,
}

/// Operations that move a buffer between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOp {
    Begin,
    BeginPass,
    EndPass,
    End,
    Submit,
    Reset,
}

/// An operation was attempted from a state that does not allow it.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("command buffer cannot {op:?} from state {from:?}")]
pub struct StateError {
    pub op: CommandOp,
    pub from: RecordState,
}

/// The one place transitions are decided. Returns the state the buffer
/// lands in, or an error naming the rejected operation.
fn transition(op: CommandOp, from: RecordState) -> Result<RecordState, StateError> {
    use RecordState::*;

    let next = match (op, from) {
        (CommandOp::Begin, Ready) => Recording,
        (CommandOp::BeginPass, Recording) => InRenderPass,
        (CommandOp::EndPass, InRenderPass) => Recording,
        (CommandOp::End, Recording) => RecordingEnded,
        (CommandOp::Submit, RecordingEnded) => Submitted,
        (CommandOp::Reset, Ready | RecordingEnded | Submitted) => Ready,
        _ => return Err(StateError { op, from }),
    };
    Ok(next)
}

pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    state: RecordState,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandBuffer {
    /// Allocates a single buffer from `pool`, leaving it ready to record.
    pub fn allocate(device: Arc<VulkanDevice>, pool: vk::CommandPool, primary: bool) -> Result<Self> {
        let level = if primary {
            vk::CommandBufferLevel::PRIMARY
        } else {
            vk::CommandBufferLevel::SECONDARY
        };
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);

        let handles = unsafe { device.device.allocate_command_buffers(&allocate_info) }
            .context("Failed to allocate command buffer")?;

        Ok(Self {
            handle: handles[0],
            state: RecordState::Ready,
            pool,
            device,
        })
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn begin(
        &mut self,
        single_use: bool,
        renderpass_continue: bool,
        simultaneous_use: bool,
    ) -> Result<()> {
        let next = transition(CommandOp::Begin, self.state)?;

        let mut flags = vk::CommandBufferUsageFlags::empty();
        if single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if renderpass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.device.begin_command_buffer(self.handle, &begin_info) }
            .context("Failed to begin command buffer")?;
        self.state = next;
        Ok(())
    }

    /// Opens a renderpass on this buffer. Called through `Renderpass::begin`,
    /// which supplies the attachment and clear configuration.
    pub fn begin_render_pass(&mut self, begin_info: &vk::RenderPassBeginInfo) -> Result<()> {
        let next = transition(CommandOp::BeginPass, self.state)?;
        unsafe {
            self.device.device.cmd_begin_render_pass(
                self.handle,
                begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        self.state = next;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        let next = transition(CommandOp::EndPass, self.state)?;
        unsafe {
            self.device.device.cmd_end_render_pass(self.handle);
        }
        self.state = next;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        let next = transition(CommandOp::End, self.state)?;
        unsafe { self.device.device.end_command_buffer(self.handle) }
            .context("Failed to end command buffer")?;
        self.state = next;
        Ok(())
    }

    /// Records that the buffer was handed to a queue. No Vulkan call; the
    /// submission itself happens alongside fence and semaphore setup.
    pub fn mark_submitted(&mut self) -> Result<()> {
        self.state = transition(CommandOp::Submit, self.state)?;
        Ok(())
    }

    /// Returns the buffer to `Ready` for re-recording. The pool is created
    /// with RESET_COMMAND_BUFFER, so per-buffer reset is allowed.
    pub fn reset(&mut self) -> Result<()> {
        let next = transition(CommandOp::Reset, self.state)?;
        unsafe {
            self.device
                .device
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
        }
        .context("Failed to reset command buffer")?;
        self.state = next;
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .free_command_buffers(self.pool, &[self.handle]);
        }
    }
}

/// Allocates a transient buffer, records into it, submits on `queue`, and
/// blocks until the queue drains. For upload and setup work only; the
/// per-frame path never goes through here.
pub fn submit_single_use<F>(
    device: &Arc<VulkanDevice>,
    pool: vk::CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(&CommandBuffer) -> Result<()>,
{
    let mut cmd = CommandBuffer::allocate(device.clone(), pool, true)?;
    cmd.begin(true, false, false)?;
    record(&cmd)?;
    cmd.end()?;

    let command_buffers = [cmd.handle];
    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
    unsafe {
        device
            .device
            .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
    }
    .context("Failed to submit single-use command buffer")?;
    cmd.mark_submitted()?;

    unsafe { device.device.queue_wait_idle(queue) }
        .context("Failed to wait for single-use submission")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ops: &[CommandOp], mut state: RecordState) -> Result<RecordState, StateError> {
        for &op in ops {
            state = transition(op, state)?;
        }
        Ok(state)
    }

    #[test]
    fn full_frame_recording_sequence() {
        let sequence = [
            CommandOp::Begin,
            CommandOp::BeginPass,
            CommandOp::EndPass,
            CommandOp::End,
            CommandOp::Submit,
            CommandOp::Reset,
        ];
        assert_eq!(run(&sequence, RecordState::Ready), Ok(RecordState::Ready));
    }

    #[test]
    fn begin_end_reset_round_trips_to_ready() {
        let state = run(
            &[CommandOp::Begin, CommandOp::End, CommandOp::Reset],
            RecordState::Ready,
        )
        .unwrap();
        assert_eq!(state, RecordState::Ready);

        // And the buffer can immediately record again.
        assert_eq!(transition(CommandOp::Begin, state), Ok(RecordState::Recording));
    }

    #[test]
    fn submit_requires_recording_ended() {
        let err = transition(CommandOp::Submit, RecordState::Recording).unwrap_err();
        assert_eq!(err.op, CommandOp::Submit);
        assert_eq!(err.from, RecordState::Recording);
    }

    #[test]
    fn end_is_rejected_inside_a_renderpass() {
        let err = transition(CommandOp::End, RecordState::InRenderPass).unwrap_err();
        assert_eq!(err.op, CommandOp::End);
    }

    #[test]
    fn begin_twice_is_rejected() {
        assert!(transition(CommandOp::Begin, RecordState::Recording).is_err());
    }

    #[test]
    fn reset_is_rejected_mid_recording() {
        assert!(transition(CommandOp::Reset, RecordState::Recording).is_err());
        assert!(transition(CommandOp::Reset, RecordState::InRenderPass).is_err());
    }

    #[test]
    fn unallocated_buffers_accept_nothing() {
        for op in [
            CommandOp::Begin,
            CommandOp::BeginPass,
            CommandOp::EndPass,
            CommandOp::End,
            CommandOp::Submit,
            CommandOp::Reset,
        ] {
            assert!(transition(op, RecordState::NotAllocated).is_err());
        }
    }

    #[test]
    fn pass_must_close_before_recording_ends() {
        let state = run(&[CommandOp::Begin, CommandOp::BeginPass], RecordState::Ready).unwrap();
        assert_eq!(state, RecordState::InRenderPass);

        let state = transition(CommandOp::EndPass, state).unwrap();
        assert_eq!(run(&[CommandOp::End], state), Ok(RecordState::RecordingEnded));
    }

    #[test]
    fn state_error_names_the_rejected_operation() {
        let err = transition(CommandOp::Submit, RecordState::Ready).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Submit"));
        assert!(message.contains("Ready"));
    }
}
