//! GPU-resident simulation
//!
//! Per-element state lives in two buffer sets. A compute step reads the
//! current set through a feedback program and writes the other; the sets
//! then swap, so the draw step that follows always reads what the compute
//! step just finished writing and never a buffer still being written.
//!
//! Attribute `name` is read by the feedback program from the storage array
//! at `@group(2) @binding(location)` and written to the varying
//! `out_<name>`; varyings are captured in attribute order.

mod feedback;
mod particles;

pub use feedback::*;
pub use particles::*;

use bytemuck::Pod;

use crate::backend::{BufferKind, PrimitiveTopology, UsageHint};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::program::Program;
use crate::resources::{GpuBuffer, VertexLayout};
use crate::scene::Camera;

/// One tracked per-element attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationAttribute {
    pub name: String,
    pub location: u32,
    /// `f32` components per element: 1, 2 or 4
    pub components: u32,
}

impl SimulationAttribute {
    pub fn new(name: &str, location: u32, components: u32) -> Self {
        Self {
            name: name.to_string(),
            location,
            components,
        }
    }

    /// Name of the feedback varying that captures this attribute
    pub fn varying(&self) -> String {
        format!("out_{}", self.name)
    }
}

/// How the draw step rasterizes elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    /// One point per element
    #[default]
    Points,
    /// One instance of `vertices_per_instance` vertices per element
    Instanced {
        vertices_per_instance: u32,
        topology: PrimitiveTopology,
    },
}

/// Everything needed to build a [`Simulation`]
#[derive(Debug, Clone)]
pub struct SimulationDescriptor {
    pub label: String,
    pub count: u32,
    pub attributes: Vec<SimulationAttribute>,
    /// Initial values per attribute, `count * components` floats each
    pub initial_data: Vec<Vec<f32>>,
    pub compute_source: String,
    /// Vertex and fragment sources of the draw step, if any
    pub render_sources: Option<(String, String)>,
    pub draw_mode: DrawMode,
}

impl SimulationDescriptor {
    pub fn new(label: &str, count: u32, compute_source: &str) -> Self {
        Self {
            label: label.to_string(),
            count,
            attributes: Vec::new(),
            initial_data: Vec::new(),
            compute_source: compute_source.to_string(),
            render_sources: None,
            draw_mode: DrawMode::Points,
        }
    }

    pub fn with_attribute(mut self, attribute: SimulationAttribute, initial: Vec<f32>) -> Self {
        self.attributes.push(attribute);
        self.initial_data.push(initial);
        self
    }

    pub fn with_render(mut self, vertex_source: &str, fragment_source: &str) -> Self {
        self.render_sources = Some((vertex_source.to_string(), fragment_source.to_string()));
        self
    }

    pub fn with_draw_mode(mut self, mode: DrawMode) -> Self {
        self.draw_mode = mode;
        self
    }

    fn validate(&self) -> RenderResult<()> {
        let invalid = |message: String| Err(RenderError::InvalidOperation(message));
        if self.count == 0 {
            return invalid(format!("simulation `{}` has no elements", self.label));
        }
        if self.attributes.is_empty() {
            return invalid(format!("simulation `{}` has no attributes", self.label));
        }
        for (index, attribute) in self.attributes.iter().enumerate() {
            if !matches!(attribute.components, 1 | 2 | 4) {
                return invalid(format!(
                    "attribute `{}` has {} components; storage arrays hold 1, 2 or 4",
                    attribute.name, attribute.components
                ));
            }
            let expected = (self.count as usize)
                .checked_mul(attribute.components as usize)
                .ok_or_else(|| {
                    RenderError::InvalidOperation(format!(
                        "attribute `{}` of `{}` is too large: {} elements of {} components",
                        attribute.name, self.label, self.count, attribute.components
                    ))
                })?;
            if self.initial_data[index].len() != expected {
                return invalid(format!(
                    "attribute `{}` needs {} floats, got {}",
                    attribute.name,
                    expected,
                    self.initial_data[index].len()
                ));
            }
            let clash = self.attributes[..index]
                .iter()
                .find(|a| a.name == attribute.name || a.location == attribute.location);
            if let Some(other) = clash {
                return invalid(format!(
                    "attributes `{}` and `{}` share a name or location",
                    other.name, attribute.name
                ));
            }
        }
        Ok(())
    }
}

/// Resources created so far by [`Simulation::new`]
#[derive(Default)]
struct Parts {
    buffers: [Vec<GpuBuffer>; 2],
    compute_program: Option<Program>,
    render_program: Option<Program>,
    compute_layouts: [Option<VertexLayout>; 2],
    render_layouts: [Option<VertexLayout>; 2],
    feedback: [Option<FeedbackTarget>; 2],
}

impl Parts {
    /// Best-effort release after a failed creation
    fn release(self, ctx: &mut RenderContext) {
        for target in self.feedback.into_iter().flatten() {
            let _ = target.destroy(ctx);
        }
        let layouts = self.compute_layouts.into_iter().chain(self.render_layouts);
        for layout in layouts.flatten() {
            let _ = layout.destroy(ctx);
        }
        for buffer in self.buffers.into_iter().flatten() {
            let _ = buffer.destroy(ctx);
        }
        for program in self.compute_program.into_iter().chain(self.render_program) {
            let _ = program.destroy(ctx);
        }
    }
}

/// Double-buffered per-element state advanced by a feedback program
#[derive(Debug)]
pub struct Simulation {
    label: String,
    count: u32,
    attributes: Vec<SimulationAttribute>,
    buffers: [Vec<GpuBuffer>; 2],
    compute_layouts: [VertexLayout; 2],
    render_layouts: Option<[VertexLayout; 2]>,
    /// `feedback[i]` writes set `i ^ 1`
    feedback: [FeedbackTarget; 2],
    compute_program: Program,
    render_program: Option<Program>,
    draw_mode: DrawMode,
    current: usize,
    steps: u64,
}

impl Simulation {
    /// Build programs, seed both buffer sets identically, and wire layouts
    /// and feedback targets for both directions
    pub fn new(ctx: &mut RenderContext, desc: SimulationDescriptor) -> RenderResult<Self> {
        desc.validate()?;

        let mut parts = Parts::default();
        if let Err(err) = Self::create_parts(ctx, &desc, &mut parts) {
            log::warn!("Simulation `{}` creation failed: {}", desc.label, err);
            parts.release(ctx);
            return Err(err);
        }
        let Parts {
            buffers,
            compute_program: Some(compute_program),
            render_program,
            compute_layouts: [Some(compute_zero), Some(compute_one)],
            render_layouts,
            feedback: [Some(feedback_zero), Some(feedback_one)],
        } = parts
        else {
            return Err(RenderError::InvalidOperation(format!(
                "simulation `{}` was not fully created",
                desc.label
            )));
        };
        let render_layouts = match render_layouts {
            [Some(zero), Some(one)] => Some([zero, one]),
            _ => None,
        };

        log::info!(
            "Created simulation `{}` with {} elements and {} attributes",
            desc.label,
            desc.count,
            desc.attributes.len()
        );

        Ok(Self {
            label: desc.label,
            count: desc.count,
            attributes: desc.attributes,
            buffers,
            compute_layouts: [compute_zero, compute_one],
            render_layouts,
            feedback: [feedback_zero, feedback_one],
            compute_program,
            render_program,
            draw_mode: desc.draw_mode,
            current: 0,
            steps: 0,
        })
    }

    fn create_parts(
        ctx: &mut RenderContext,
        desc: &SimulationDescriptor,
        parts: &mut Parts,
    ) -> RenderResult<()> {
        for set in parts.buffers.iter_mut() {
            for data in &desc.initial_data {
                set.push(GpuBuffer::new(
                    ctx,
                    BufferKind::Vertex,
                    data.as_slice(),
                    UsageHint::Dynamic,
                )?);
            }
        }

        let varyings: Vec<String> = desc.attributes.iter().map(|a| a.varying()).collect();
        let varying_refs: Vec<&str> = varyings.iter().map(String::as_str).collect();
        parts.compute_program = Some(Program::feedback(
            ctx,
            &desc.label,
            &desc.compute_source,
            &varying_refs,
        )?);
        if let Some((vertex, fragment)) = &desc.render_sources {
            parts.render_program = Some(Program::new(
                ctx,
                &format!("{} render", desc.label),
                vertex,
                fragment,
            )?);
        }

        for set in 0..2 {
            parts.compute_layouts[set] = Some(Self::build_layout(
                ctx,
                desc,
                &parts.buffers[set],
                &format!("compute {}", set),
                false,
            )?);
        }
        if parts.render_program.is_some() {
            let instanced = matches!(desc.draw_mode, DrawMode::Instanced { .. });
            for set in 0..2 {
                parts.render_layouts[set] = Some(Self::build_layout(
                    ctx,
                    desc,
                    &parts.buffers[set],
                    &format!("render {}", set),
                    instanced,
                )?);
            }
        }

        // feedback[i] reads set i and writes the other one
        for set in 0..2 {
            let writes: Vec<&GpuBuffer> = parts.buffers[set ^ 1].iter().collect();
            parts.feedback[set] = Some(FeedbackTarget::new(ctx, &writes)?);
        }
        Ok(())
    }

    fn build_layout(
        ctx: &mut RenderContext,
        desc: &SimulationDescriptor,
        set: &[GpuBuffer],
        name: &str,
        instanced: bool,
    ) -> RenderResult<VertexLayout> {
        let mut builder = VertexLayout::builder(format!("{} {}", desc.label, name));
        for (attribute, buffer) in desc.attributes.iter().zip(set) {
            let components = attribute.components as u8;
            builder = if instanced {
                builder.instanced_attribute(attribute.location, buffer, components)
            } else {
                builder.float_attribute(attribute.location, buffer, components)
            };
        }
        builder.vertex_count(desc.count).build(ctx)
    }

    /// Advance one step: read the current set, write the other, swap
    ///
    /// Rasterization is discarded for the duration of the capture and
    /// restored afterwards even when the step fails.
    pub fn compute_step(&mut self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.set_rasterizer_discard(true);
        let result = self.capture(ctx);
        if result.is_err() && ctx.state().feedback.is_some() {
            if let Err(err) = ctx.end_feedback() {
                log::warn!("Failed to end feedback of `{}`: {}", self.label, err);
            }
        }
        ctx.set_rasterizer_discard(false);
        result?;

        self.current ^= 1;
        self.steps += 1;
        log::trace!("Simulation `{}` stepped to set {}", self.label, self.current);
        Ok(())
    }

    fn capture(&mut self, ctx: &mut RenderContext) -> RenderResult<()> {
        let layout = &self.compute_layouts[self.current];
        self.compute_program.bind(ctx)?;
        layout.bind(ctx)?;
        ctx.begin_feedback(self.feedback[self.current].handle(), PrimitiveTopology::PointList)?;
        ctx.draw(PrimitiveTopology::PointList, 0, self.count, 1)?;
        ctx.end_feedback()?;
        layout.unbind(ctx)
    }

    /// Draw the current set through the render program
    pub fn draw_step(&mut self, ctx: &mut RenderContext, camera: &Camera) -> RenderResult<()> {
        let (Some(program), Some(layouts)) = (self.render_program.as_mut(), self.render_layouts.as_ref())
        else {
            return Err(RenderError::InvalidOperation(format!(
                "simulation `{}` has no render program",
                self.label
            )));
        };

        program.set_uniform(ctx, "u_view", camera.view_matrix())?;
        program.set_uniform(ctx, "u_projection", camera.projection_matrix())?;
        program.bind(ctx)?;

        let layout = &layouts[self.current];
        layout.bind(ctx)?;
        let result = match self.draw_mode {
            DrawMode::Points => ctx.draw(PrimitiveTopology::PointList, 0, self.count, 1),
            DrawMode::Instanced {
                vertices_per_instance,
                topology,
            } => ctx.draw(topology, 0, vertices_per_instance, self.count),
        };
        layout.unbind(ctx)?;
        result
    }

    pub fn step_and_draw(&mut self, ctx: &mut RenderContext, camera: &Camera) -> RenderResult<()> {
        self.compute_step(ctx)?;
        self.draw_step(ctx, camera)
    }

    /// Index of the set the next compute step reads and the draw step shows
    pub fn current_set(&self) -> usize {
        self.current
    }

    fn attribute_index(&self, name: &str) -> RenderResult<usize> {
        self.attributes
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| {
                RenderError::InvalidOperation(format!(
                    "simulation `{}` has no attribute `{}`",
                    self.label, name
                ))
            })
    }

    /// Read an attribute of the current set
    pub fn read_attribute<T: Pod>(&self, ctx: &mut RenderContext, name: &str) -> RenderResult<Vec<T>> {
        let index = self.attribute_index(name)?;
        self.buffers[self.current][index].read(ctx)
    }

    /// Overwrite an attribute of the current set starting at element `offset`
    pub fn write_attribute<T: Pod>(
        &mut self,
        ctx: &mut RenderContext,
        name: &str,
        offset: usize,
        data: &[T],
    ) -> RenderResult<()> {
        let index = self.attribute_index(name)?;
        let components = self.attributes[index].components as usize;
        let floats: &[f32] = bytemuck::try_cast_slice(data).map_err(|err| {
            RenderError::InvalidOperation(format!("attribute `{}` takes f32 data: {}", name, err))
        })?;
        self.buffers[self.current][index].update(ctx, offset * components, floats)
    }

    pub fn attributes(&self) -> &[SimulationAttribute] {
        &self.attributes
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Compute steps taken so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn compute_program(&self) -> &Program {
        &self.compute_program
    }

    pub fn compute_program_mut(&mut self) -> &mut Program {
        &mut self.compute_program
    }

    pub fn render_program_mut(&mut self) -> Option<&mut Program> {
        self.render_program.as_mut()
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        for target in self.feedback {
            target.destroy(ctx)?;
        }
        for layout in self.compute_layouts {
            layout.destroy(ctx)?;
        }
        if let Some(layouts) = self.render_layouts {
            for layout in layouts {
                layout.destroy(ctx)?;
            }
        }
        for set in self.buffers {
            for buffer in set {
                buffer.destroy(ctx)?;
            }
        }
        self.compute_program.destroy(ctx)?;
        if let Some(program) = self.render_program {
            program.destroy(ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, ResourceKind};

    const PASSTHROUGH: &str = r#"
@group(2) @binding(0) var<storage, read> in_value: array<f32>;
@group(3) @binding(0) var<storage, read_write> out_value: array<f32>;

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&out_value)) {
        return;
    }
    out_value[i] = in_value[i] + 1.0;
}
"#;

    fn descriptor() -> SimulationDescriptor {
        SimulationDescriptor::new("counter", 4, PASSTHROUGH)
            .with_attribute(SimulationAttribute::new("value", 0, 1), vec![0.0, 1.0, 2.0, 3.0])
    }

    #[test]
    fn test_validation() {
        let mut ctx = RenderContext::headless(8, 8);
        let bad = SimulationDescriptor::new("bad", 2, PASSTHROUGH)
            .with_attribute(SimulationAttribute::new("value", 0, 3), vec![0.0; 6]);
        assert!(matches!(
            Simulation::new(&mut ctx, bad),
            Err(RenderError::InvalidOperation(_))
        ));
        let short = SimulationDescriptor::new("short", 2, PASSTHROUGH)
            .with_attribute(SimulationAttribute::new("value", 0, 1), vec![0.0]);
        assert!(Simulation::new(&mut ctx, short).is_err());
    }

    #[test]
    fn test_oversized_descriptor_is_rejected() {
        let mut ctx = RenderContext::headless(8, 8);
        let huge = SimulationDescriptor::new("huge", 1 << 30, PASSTHROUGH)
            .with_attribute(SimulationAttribute::new("value", 0, 4), Vec::new());
        assert!(matches!(
            Simulation::new(&mut ctx, huge),
            Err(RenderError::InvalidOperation(_))
        ));
        let widest = SimulationDescriptor::new("widest", u32::MAX, PASSTHROUGH)
            .with_attribute(SimulationAttribute::new("value", 0, 4), Vec::new());
        assert!(Simulation::new(&mut ctx, widest).is_err());
    }

    #[test]
    fn test_failed_creation_releases_resources() {
        let mut ctx = RenderContext::headless(8, 8);
        let broken = descriptor().with_render("fn vs_main( {", "fn fs_main( {");
        assert!(matches!(
            Simulation::new(&mut ctx, broken),
            Err(RenderError::ShaderCompile { .. })
        ));

        let backend = ctx.backend::<HeadlessBackend>().unwrap();
        for kind in [
            ResourceKind::Buffer,
            ResourceKind::Program,
            ResourceKind::Shader,
            ResourceKind::VertexLayout,
            ResourceKind::Feedback,
        ] {
            assert_eq!(backend.live_count(kind), 0, "{:?}", kind);
        }
    }

    #[test]
    fn test_step_swaps_and_restores_rasterization() {
        let mut ctx = RenderContext::headless(8, 8);
        let mut sim = Simulation::new(&mut ctx, descriptor()).unwrap();
        let handle = sim.compute_program().handle();
        ctx.backend_mut::<HeadlessBackend>().unwrap().register_kernel(handle, |invocation| {
            vec![invocation.inputs[0].iter().map(|v| v + 1.0).collect()]
        });

        sim.compute_step(&mut ctx).unwrap();
        assert_eq!(sim.current_set(), 1);
        assert_eq!(sim.read_attribute::<f32>(&mut ctx, "value").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(!ctx.state().rasterizer_discard);

        let backend = ctx.backend::<HeadlessBackend>().unwrap();
        let record = &backend.draws()[0];
        assert!(record.feedback);
        assert!(record.rasterizer_discard);
        assert_eq!(record.count, 4);
    }

    #[test]
    fn test_write_attribute_targets_current_set() {
        let mut ctx = RenderContext::headless(8, 8);
        let mut sim = Simulation::new(&mut ctx, descriptor()).unwrap();
        sim.write_attribute(&mut ctx, "value", 2, &[9.0f32, 8.0]).unwrap();
        assert_eq!(sim.read_attribute::<f32>(&mut ctx, "value").unwrap(), vec![0.0, 1.0, 9.0, 8.0]);
        assert!(sim.write_attribute(&mut ctx, "missing", 0, &[1.0f32]).is_err());
    }

    #[test]
    fn test_draw_step_requires_render_program() {
        let mut ctx = RenderContext::headless(8, 8);
        let mut sim = Simulation::new(&mut ctx, descriptor()).unwrap();
        let camera = Camera::default();
        assert!(matches!(
            sim.draw_step(&mut ctx, &camera),
            Err(RenderError::InvalidOperation(_))
        ));
    }
}
