//! GPU compute backend for the sampling engine.
//!
//! Provides batched lattice-path chains, batched coupling from the past and
//! the growth-diagram wavefront using WebGPU (wgpu). Every readback carries
//! a wall-clock timeout; callers fall back to the CPU on any error.

mod chains;
mod growth;

pub use chains::{GpuChains, PathCftpBatch};
pub use growth::GpuGrowth;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// PCG generator shared by every shader module.
const PCG_SHADER: &str = include_str!("shaders/pcg.wgsl");

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("GPU readback did not complete within {0:?}")]
    Timeout(Duration),

    #[error("GPU device was lost")]
    DeviceLost,

    #[error("Blocking GPU readback is not supported on this target")]
    Unsupported,

    #[error("Request exceeds device limits: {0}")]
    TooLarge(String),
}

/// Device, queue and health state shared by the GPU backends.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
    timeout: Duration,
}

impl GpuContext {
    /// Request a high-performance adapter and a device.
    pub async fn new(label: &str, timeout: Duration) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("GPU device lost ({reason:?}): {message}");
            flag.store(true, Ordering::Release);
        });

        log::info!("GPU context '{}' ready ({:?})", label, adapter.get_info().backend);
        Ok(Self {
            device,
            queue,
            lost,
            timeout,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Fail early when the device can no longer run work.
    pub fn check(&self) -> Result<(), GpuError> {
        if self.is_lost() {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Build a compute pipeline from a shader that uses the PCG helpers.
    pub fn pipeline(
        &self,
        label: &str,
        source: &str,
        entry_point: &str,
        layout: &wgpu::BindGroupLayout,
    ) -> wgpu::ComputePipeline {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(format!("{PCG_SHADER}\n{source}").into()),
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                ..Default::default()
            });
        self.device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
    }

    /// Storage buffer initialised with `contents`.
    pub fn storage_buffer<T: bytemuck::Pod>(&self, label: &str, contents: &[T]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (std::mem::size_of_val(contents) as u64).max(4),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        if !contents.is_empty() {
            self.queue
                .write_buffer(&buffer, 0, bytemuck::cast_slice(contents));
        }
        buffer
    }

    /// Fail when `len` words do not fit in one storage binding.
    pub fn check_size(&self, label: &str, len: usize) -> Result<(), GpuError> {
        let size = len as u64 * 4;
        if size > self.device.limits().max_storage_buffer_binding_size as u64 {
            return Err(GpuError::TooLarge(format!("{label}: {size} bytes")));
        }
        Ok(())
    }

    /// Zeroed storage buffer holding `len` words.
    pub fn zeroed_buffer(&self, label: &str, len: usize) -> Result<wgpu::Buffer, GpuError> {
        self.check_size(label, len)?;
        let size = (len as u64 * 4).max(4);
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }))
    }

    /// Uniform buffer holding `params`.
    pub fn uniform_buffer<T: bytemuck::Pod>(&self, label: &str, params: &T) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<T>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, bytemuck::bytes_of(params));
        buffer
    }

    /// Record one compute pass of `workgroups` groups.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: u32,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }

    /// Copy `len` words out of `source` and wait for them.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn read_words(&self, source: &wgpu::Buffer, len: usize) -> Result<Vec<u32>, GpuError> {
        use std::sync::mpsc::TryRecvError;
        use std::time::Instant;

        self.check()?;
        let size = (len as u64 * 4).max(4);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            self.check()?;
            let _ = self.device.poll(wgpu::PollType::Poll);
            match rx.try_recv() {
                Ok(result) => {
                    result?;
                    break;
                }
                Err(TryRecvError::Disconnected) => return Err(GpuError::DeviceLost),
                Err(TryRecvError::Empty) => {}
            }
            if Instant::now() >= deadline {
                log::warn!("GPU readback timed out after {:?}", self.timeout);
                return Err(GpuError::Timeout(self.timeout));
            }
            std::thread::sleep(Duration::from_micros(100));
        }

        let words = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, u32>(&data)[..len].to_vec()
        };
        staging.unmap();
        Ok(words)
    }

    /// Blocking readback is unavailable in the browser.
    #[cfg(target_arch = "wasm32")]
    pub fn read_words(&self, _source: &wgpu::Buffer, _len: usize) -> Result<Vec<u32>, GpuError> {
        Err(GpuError::Unsupported)
    }
}

/// Bind group layout of `read_only` flags: binding 0 is a uniform, binding
/// i + 1 a storage buffer.
fn storage_layout(device: &wgpu::Device, label: &str, read_only: &[bool]) -> wgpu::BindGroupLayout {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for (i, &read_only) in read_only.iter().enumerate() {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: i as u32 + 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

/// Bind `params` at 0 followed by `buffers` at 1.. .
fn bind_buffers(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    params: &wgpu::Buffer,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: params.as_entire_binding(),
    }];
    for (i, buffer) in buffers.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: i as u32 + 1,
            resource: buffer.as_entire_binding(),
        });
    }
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

/// Workgroup size used by every sampling shader.
const WORKGROUP_SIZE: u32 = 64;

fn workgroups_for(items: u32) -> u32 {
    items.div_ceil(WORKGROUP_SIZE).max(1)
}
