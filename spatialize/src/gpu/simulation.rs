//! GPU force engine using wgpu compute shaders
//!
//! Node state lives on the GPU between ticks; it is only read back when the
//! caller asks for a snapshot. Each step reads back the 4-byte sanitized
//! counter so the step report matches the CPU engines.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::GpuError;
use super::shaders::ForceShaders;
use super::types::{GpuNode, SimulationUniforms, SpringAdjacency, WORKGROUP_SIZE};
use crate::simulation::{ForceEngine, SimEdge, SimNode, SimulationConfig, StepReport};

/// Force engine running on the GPU
pub struct GpuEngine {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    // Compute pipelines
    force_pipeline: wgpu::ComputePipeline,
    integrate_pipeline: wgpu::ComputePipeline,

    // Buffers
    node_buffer: wgpu::Buffer,
    counter_buffer: wgpu::Buffer,
    // Kept alive to maintain GPU resources (referenced by bind_group)
    _force_buffer: wgpu::Buffer,
    _offset_buffer: wgpu::Buffer,
    _spring_buffer: wgpu::Buffer,

    bind_group: wgpu::BindGroup,

    // Staging buffers for reading back results
    staging_buffer: wgpu::Buffer,
    counter_staging: wgpu::Buffer,

    config: SimulationConfig,
    ids: Vec<String>,
    /// Returned by `read_nodes` when the GPU readback fails
    fallback: Vec<SimNode>,
    /// Counter value seen at the end of the previous step
    sanitized_total: usize,
}

fn storage_buffer(device: &wgpu::Device, label: &str, contents: &[u8], extra: wgpu::BufferUsages) -> wgpu::Buffer {
    let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra;
    if contents.is_empty() {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: 32,
            usage,
            mapped_at_creation: false,
        })
    } else {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuEngine {
    /// Create an engine on a freshly requested device
    pub fn new(nodes: &[SimNode], edges: &[SimEdge], config: SimulationConfig) -> Result<Self, GpuError> {
        let (device, queue) = pollster::block_on(create_device())?;
        Ok(Self::with_device(Arc::new(device), Arc::new(queue), nodes, edges, config))
    }

    /// Create an engine using an existing device and queue
    pub fn with_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        nodes: &[SimNode],
        edges: &[SimEdge],
        config: SimulationConfig,
    ) -> Self {
        let shaders = ForceShaders::new();

        let force_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Accumulate Forces Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders.accumulate_forces.into()),
        });
        let integrate_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Integrate Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders.integrate.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Force Engine Bind Group Layout"),
            entries: &[
                storage_entry(0, false),
                storage_entry(1, false),
                storage_entry(2, true),
                storage_entry(3, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(5, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Force Engine Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let force_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Accumulate Forces Pipeline"),
            layout: Some(&pipeline_layout),
            module: &force_module,
            entry_point: Some("accumulate_forces"),
            compilation_options: Default::default(),
            cache: None,
        });

        let integrate_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Integrate Pipeline"),
            layout: Some(&pipeline_layout),
            module: &integrate_module,
            entry_point: Some("integrate"),
            compilation_options: Default::default(),
            cache: None,
        });

        let gpu_nodes: Vec<GpuNode> = nodes.iter().map(GpuNode::from).collect();
        let adjacency = SpringAdjacency::build(nodes.len(), edges);
        let forces = vec![[0.0f32; 4]; nodes.len()];

        let node_buffer = storage_buffer(
            &device,
            "Node Buffer",
            bytemuck::cast_slice(&gpu_nodes),
            wgpu::BufferUsages::COPY_SRC,
        );
        let force_buffer = storage_buffer(
            &device,
            "Force Buffer",
            bytemuck::cast_slice(&forces),
            wgpu::BufferUsages::empty(),
        );
        let offset_buffer = storage_buffer(
            &device,
            "Spring Offset Buffer",
            bytemuck::cast_slice(&adjacency.offsets),
            wgpu::BufferUsages::empty(),
        );
        let spring_buffer = storage_buffer(
            &device,
            "Spring Buffer",
            bytemuck::cast_slice(&adjacency.springs),
            wgpu::BufferUsages::empty(),
        );
        let counter_buffer = storage_buffer(&device, "Sanitized Counter", &[0u8; 16], wgpu::BufferUsages::COPY_SRC);

        let uniforms = SimulationUniforms::new(nodes.len() as u32, &config);
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Uniform Buffer"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Force Engine Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: node_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: force_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: offset_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: spring_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: counter_buffer.as_entire_binding(),
                },
            ],
        });

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: node_buffer.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let counter_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Counter Staging Buffer"),
            size: counter_buffer.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            force_pipeline,
            integrate_pipeline,
            node_buffer,
            counter_buffer,
            _force_buffer: force_buffer,
            _offset_buffer: offset_buffer,
            _spring_buffer: spring_buffer,
            bind_group,
            staging_buffer,
            counter_staging,
            config,
            ids: nodes.iter().map(|n| n.id.clone()).collect(),
            fallback: nodes.to_vec(),
            sanitized_total: 0,
        }
    }

    /// Copy `source` into `staging` and map it for reading
    fn read_back(&self, source: &wgpu::Buffer, staging: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, GpuError> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::BufferMap(e.to_string()))?
            .map_err(|e| GpuError::BufferMap(e.to_string()))?;

        let data = buffer_slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    /// Current value of the shader's sanitized counter
    fn read_sanitized_counter(&self) -> Result<usize, GpuError> {
        let data = self.read_back(&self.counter_buffer, &self.counter_staging, 4)?;
        Ok(bytemuck::pod_read_unaligned::<u32>(&data[..4]) as usize)
    }

    fn try_read_nodes(&self) -> Result<Vec<SimNode>, GpuError> {
        if self.ids.is_empty() {
            return Ok(Vec::new());
        }
        let size = (self.ids.len() * std::mem::size_of::<GpuNode>()) as u64;
        let data = self.read_back(&self.node_buffer, &self.staging_buffer, size)?;
        let gpu_nodes: Vec<GpuNode> = bytemuck::pod_collect_to_vec(&data);
        Ok(gpu_nodes
            .iter()
            .zip(&self.ids)
            .map(|(node, id)| node.to_sim_node(id.clone()))
            .collect())
    }
}

impl ForceEngine for GpuEngine {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn step(&mut self) -> StepReport {
        let node_count = self.ids.len() as u32;
        if node_count == 0 {
            return StepReport::default();
        }
        let workgroups = node_count.div_ceil(WORKGROUP_SIZE);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Force Engine Encoder"),
        });

        for _ in 0..self.config.substeps {
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Accumulate Forces Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.force_pipeline);
                pass.set_bind_group(0, &self.bind_group, &[]);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Integration Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.integrate_pipeline);
                pass.set_bind_group(0, &self.bind_group, &[]);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        // The readback is queued behind the step, so it sees this step's count
        match self.read_sanitized_counter() {
            Ok(total) => {
                let sanitized = total.saturating_sub(self.sanitized_total);
                self.sanitized_total = total;
                StepReport { sanitized }
            }
            Err(err) => {
                tracing::error!(%err, "GPU counter readback failed");
                StepReport::default()
            }
        }
    }

    fn read_nodes(&self) -> Vec<SimNode> {
        match self.try_read_nodes() {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::error!(%err, "GPU readback failed, returning last uploaded nodes");
                self.fallback.clone()
            }
        }
    }

    fn update_nodes(&mut self, nodes: &[SimNode]) {
        if nodes.len() != self.ids.len() {
            tracing::warn!(expected = self.ids.len(), got = nodes.len(), "node count mismatch, update ignored");
            return;
        }
        let gpu_nodes: Vec<GpuNode> = nodes.iter().map(GpuNode::from).collect();
        self.queue
            .write_buffer(&self.node_buffer, 0, bytemuck::cast_slice(&gpu_nodes));
        self.fallback = nodes.to_vec();
    }

    fn node_count(&self) -> usize {
        self.ids.len()
    }

    fn sanitized_total(&self) -> usize {
        self.sanitized_total
    }
}

async fn create_device() -> Result<(wgpu::Device, wgpu::Queue), GpuError> {
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
        .ok_or(GpuError::NoAdapter)?;

    let device = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Force Engine Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None, // trace path
        )
        .await?;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vec3;

    // Machines without a usable adapter skip these tests
    fn engine(nodes: &[SimNode], edges: &[SimEdge]) -> Option<GpuEngine> {
        match GpuEngine::new(nodes, edges, SimulationConfig::default()) {
            Ok(engine) => Some(engine),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    fn pair() -> (Vec<SimNode>, Vec<SimEdge>) {
        let nodes = vec![
            SimNode::new("a", Vec3::new(0.0, 0.0, 0.0)).with_charge(0.0),
            SimNode::new("b", Vec3::new(100.0, 0.0, 0.0)).with_charge(0.0),
        ];
        let edges = vec![SimEdge {
            source: 0,
            target: 1,
            rest_distance: 50.0,
            strength: 1.0,
        }];
        (nodes, edges)
    }

    #[test]
    fn test_spring_converges() {
        let (nodes, edges) = pair();
        let Some(mut engine) = engine(&nodes, &edges) else { return };

        for _ in 0..500 {
            engine.step();
        }

        let result = engine.read_nodes();
        let d = result[0].position.distance(result[1].position);
        assert!((d - 50.0).abs() < 0.5, "separation {d}");
    }

    #[test]
    fn test_matches_cpu_engine() {
        let nodes: Vec<SimNode> = (0..300)
            .map(|i| SimNode::new(format!("n{i}"), crate::simulation::fibonacci_sphere(i, 300, 150.0)))
            .collect();
        let Some(mut gpu) = engine(&nodes, &[]) else { return };
        let mut cpu = crate::simulation::SequentialEngine::new(nodes, Vec::new(), SimulationConfig::default());

        gpu.step();
        cpu.step();

        for (a, b) in gpu.read_nodes().iter().zip(cpu.read_nodes()) {
            assert!(a.position.distance(b.position) < 1e-2, "{} differs", a.id);
        }
    }

    #[test]
    fn test_empty_graph() {
        let Some(mut engine) = engine(&[], &[]) else { return };
        engine.step();
        assert!(engine.read_nodes().is_empty());
        assert_eq!(engine.sanitized_total(), 0);
    }

    #[test]
    fn test_step_reports_sanitized_nodes() {
        let (mut nodes, edges) = pair();
        nodes[0].velocity = Vec3::new(f32::NAN, 0.0, 0.0);
        let Some(mut engine) = engine(&nodes, &edges) else { return };

        let first = engine.step();
        let second = engine.step();

        assert_eq!(first.sanitized, 1);
        assert_eq!(second.sanitized, 0);
        assert_eq!(engine.sanitized_total(), 1);

        let restored = engine.read_nodes();
        assert_eq!(restored[0].position, Vec3::ZERO);
        assert!(restored[0].velocity.is_finite());
    }

    #[test]
    fn test_update_nodes() {
        let (mut nodes, edges) = pair();
        let Some(mut engine) = engine(&nodes, &edges) else { return };

        nodes[1].position = Vec3::new(0.0, 7.0, 0.0);
        nodes[1].fixed = true;
        engine.update_nodes(&nodes);
        engine.step();

        assert_eq!(engine.read_nodes()[1].position, Vec3::new(0.0, 7.0, 0.0));
    }
}
