#![allow(dead_code)]

use std::{
    collections::HashMap,
    ops::Range,
    path::Path,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use batch_ngin::{
    cgmath::{Matrix4, Vector3},
    context::{BufferDesc, BufferUsage, GpuBackend, GpuContext, GpuError, TextureDesc},
    data_structures::{
        instance::{Instance, InstanceRaw},
        model::{MeshData, ModelVertex, Placement},
    },
    render::{DrawCall, DrawTarget, ShaderPass},
    resources::{Asset, AssetKind, model::Model},
};
use parking_lot::Mutex;

/// Buffer of the mock backend. Contents are shared so tests can inspect them.
#[derive(Debug, Clone)]
pub struct MockBuffer {
    pub id: usize,
    pub label: String,
    pub usage: BufferUsage,
    pub contents: Arc<Mutex<Vec<u8>>>,
}

impl MockBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.contents.lock().clone()
    }

    /// The first `count` records stored in the buffer.
    pub fn records<T: bytemuck::Pod>(&self, count: usize) -> Vec<T> {
        let bytes = self.contents.lock();
        bytes
            .chunks_exact(std::mem::size_of::<T>())
            .take(count)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }
}

#[derive(Debug)]
pub struct MockTexture {
    pub id: usize,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// One `write_buffer` call: buffer id, byte offset, byte length.
pub type WriteRecord = (usize, u64, usize);

#[derive(Debug, Default)]
pub struct MockBackend {
    next_id: AtomicUsize,
    pub buffers_created: AtomicUsize,
    pub textures_created: AtomicUsize,
    pub fail_buffers: AtomicBool,
    pub writes: Mutex<Vec<WriteRecord>>,
    /// Makes every call take [`SLOW_GPU_CALL`].
    pub slow_calls: AtomicBool,
    in_flight: AtomicUsize,
    /// Most calls that were ever running at the same time.
    pub max_in_flight: AtomicUsize,
}

pub const SLOW_GPU_CALL: Duration = Duration::from_millis(2);

impl MockBackend {
    pub fn writes_to(&self, buffer: &MockBuffer) -> Vec<WriteRecord> {
        self.writes
            .lock()
            .iter()
            .filter(|(id, _, _)| *id == buffer.id)
            .copied()
            .collect()
    }

    fn tracked<R>(&self, call: impl FnOnce() -> R) -> R {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if self.slow_calls.load(Ordering::SeqCst) {
            thread::sleep(SLOW_GPU_CALL);
        }
        let result = call();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl GpuBackend for MockBackend {
    type Buffer = MockBuffer;
    type Texture = MockTexture;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, GpuError> {
        self.tracked(|| self.make_buffer(desc))
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        self.tracked(|| self.copy_into(buffer, offset, data));
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Self::Texture, GpuError> {
        self.tracked(|| self.make_texture(desc))
    }
}

impl MockBackend {
    fn make_buffer(&self, desc: &BufferDesc<'_>) -> Result<MockBuffer, GpuError> {
        if self.fail_buffers.load(Ordering::SeqCst) {
            return Err(GpuError::BufferCreation {
                label: desc.label.to_string(),
                reason: "forced failure".to_string(),
            });
        }
        self.buffers_created.fetch_add(1, Ordering::SeqCst);
        let contents = match desc.contents {
            Some(contents) => contents.to_vec(),
            None => vec![0; desc.size as usize],
        };
        Ok(MockBuffer {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            label: desc.label.to_string(),
            usage: desc.usage,
            contents: Arc::new(Mutex::new(contents)),
        })
    }

    fn copy_into(&self, buffer: &MockBuffer, offset: u64, data: &[u8]) {
        let mut contents = buffer.contents.lock();
        let start = offset as usize;
        let end = start + data.len();
        assert!(end <= contents.len(), "write past the end of {}", buffer.label);
        contents[start..end].copy_from_slice(data);
        self.writes.lock().push((buffer.id, offset, data.len()));
    }

    fn make_texture(&self, desc: &TextureDesc<'_>) -> Result<MockTexture, GpuError> {
        self.textures_created.fetch_add(1, Ordering::SeqCst);
        Ok(MockTexture {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            width: desc.width,
            height: desc.height,
            rgba: desc.rgba.to_vec(),
        })
    }
}

pub fn mock_context() -> Arc<GpuContext<MockBackend>> {
    mock_context_at(".")
}

pub fn mock_context_at(root: impl AsRef<Path>) -> Arc<GpuContext<MockBackend>> {
    Arc::new(GpuContext::new(MockBackend::default(), root.as_ref()))
}

#[derive(Debug)]
pub struct RecordedDraw {
    pub vertex: usize,
    pub index: Option<usize>,
    pub instances: usize,
    pub index_count: u32,
    pub instance_range: Range<u32>,
    /// Instance records covered by `instance_range`, read at draw time.
    pub records: Vec<InstanceRaw>,
}

#[derive(Debug)]
pub struct RecordedPredraw {
    pub mesh: String,
    pub world: Option<Matrix4<f32>>,
    pub instanced: bool,
}

/// [`DrawTarget`] that remembers every call.
pub struct RecordingTarget {
    pub pass: ShaderPass,
    pub draws: Vec<RecordedDraw>,
    pub predraws: Vec<RecordedPredraw>,
}

impl RecordingTarget {
    pub fn new(pass: ShaderPass) -> Self {
        Self {
            pass,
            draws: Vec::new(),
            predraws: Vec::new(),
        }
    }
}

impl DrawTarget<MockBackend> for RecordingTarget {
    fn active_pass(&self) -> ShaderPass {
        self.pass
    }

    fn predraw(
        &mut self,
        mesh: &batch_ngin::data_structures::model::Mesh<MockBackend>,
        world: Option<Matrix4<f32>>,
        instanced: bool,
    ) {
        self.predraws.push(RecordedPredraw {
            mesh: mesh.name.clone(),
            world,
            instanced,
        });
    }

    fn draw(&mut self, call: DrawCall<'_, MockBackend>) {
        let end = call.instance_range.end as usize;
        let start = call.instance_range.start as usize;
        let records = call.instances.records::<InstanceRaw>(end)[start..].to_vec();
        self.draws.push(RecordedDraw {
            vertex: call.vertex.id,
            index: call.index.map(|i| i.id),
            instances: call.instances.id,
            index_count: call.index_count,
            instance_range: call.instance_range,
            records,
        });
    }
}

/// A unit quad in the XY plane.
pub fn quad_data(name: &str) -> MeshData {
    let vertex = |x: f32, y: f32| ModelVertex {
        position: [x, y, 0.0],
        tex_coords: [x, y],
        normal: [0.0, 0.0, 1.0],
    };
    MeshData {
        name: name.to_string(),
        vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(1.0, 1.0), vertex(0.0, 1.0)],
        indices: vec![0, 1, 2, 0, 2, 3],
        material: None,
    }
}

/// A model with one quad mesh per entry of `tally`, placed that many times.
/// Placement `n` sits at x = n.
pub fn tally_model(ctx: &GpuContext<MockBackend>, name: &str, tally: &[usize]) -> Model<MockBackend> {
    let data: Vec<MeshData> = (0..tally.len())
        .map(|id| quad_data(&format!("{name}#{id}")))
        .collect();
    let mut placements = Vec::new();
    for (mesh_id, count) in tally.iter().enumerate() {
        for _ in 0..*count {
            let x = placements.len() as f32;
            placements.push(Placement::new(mesh_id, Instance::from(Vector3::new(x, 0.0, 0.0))));
        }
    }
    Model::from_mesh_data(ctx, name, &data, placements).expect("mock model")
}

pub fn raw_at(x: f32) -> InstanceRaw {
    Instance::from(Vector3::new(x, 0.0, 0.0)).to_raw()
}

static SLOW_LOADS: LazyLock<Mutex<HashMap<String, usize>>> = LazyLock::new(Default::default);

/// Asset that takes a while to load. Names starting with `bad` fail.
pub struct SlowAsset {
    pub name: String,
}

pub const SLOW_LOAD_TIME: Duration = Duration::from_millis(50);

impl Asset for SlowAsset {
    type Context = GpuContext<MockBackend>;

    const KIND: AssetKind = AssetKind::Custom("slow");

    fn load(name: &str, _ctx: &Self::Context) -> anyhow::Result<Self> {
        *SLOW_LOADS.lock().entry(name.to_string()).or_default() += 1;
        thread::sleep(SLOW_LOAD_TIME);
        if name.starts_with("bad") {
            anyhow::bail!("refusing to load {name}");
        }
        Ok(Self {
            name: name.to_string(),
        })
    }
}

/// How often `SlowAsset::load` ran for `name`.
pub fn slow_loads(name: &str) -> usize {
    SLOW_LOADS.lock().get(name).copied().unwrap_or(0)
}

pub fn write_png(dir: &Path, name: &str, rgba: [u8; 4]) {
    image::RgbaImage::from_pixel(2, 3, image::Rgba(rgba))
        .save(dir.join(name))
        .expect("write png");
}

/// Two named triangles.
pub const TWO_OBJECT_OBJ: &str = "\
o first
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
f 1 2 3
o second
v 0.0 0.0 1.0
v 2.0 0.0 1.0
v 0.0 2.0 1.0
f 4 5 6
";

/// A triangle mesh placed twice: once under a translated parent, once scaled.
pub const NESTED_GLTF: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [ { "nodes": [0, 2] } ],
  "nodes": [
    { "translation": [1.0, 0.0, 0.0], "children": [1] },
    { "mesh": 0, "translation": [0.0, 2.0, 0.0] },
    { "mesh": 0, "scale": [2.0, 2.0, 2.0] }
  ],
  "meshes": [ { "name": "tri", "primitives": [ { "attributes": { "POSITION": 0 }, "indices": 1 } ] } ],
  "buffers": [ { "byteLength": 48, "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAAAAAEAAAACAAAA" } ],
  "bufferViews": [
    { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
    { "buffer": 0, "byteOffset": 36, "byteLength": 12, "target": 34963 }
  ],
  "accessors": [
    { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
    { "bufferView": 1, "componentType": 5125, "count": 3, "type": "SCALAR" }
  ]
}"#;
