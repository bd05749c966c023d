/// COCO YOLO object detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, class decoding and NMS. The
/// session lives in an `OnnxYoloModel` shared through `ModelManager`; each
/// detector only holds a handle to it.
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::detection::domain::detection::Detection;
use crate::detection::domain::model_manager::{ModelHandle, ModelLoadError, ModelManager};
use crate::detection::domain::object_detector::{DetectionError, DetectorFactory, ObjectDetector};
use crate::detection::infrastructure::execution_provider::preferred_execution_providers;
use crate::detection::infrastructure::model_resolver;
use crate::shared::bbox::BoundingBox;
use crate::shared::constants::COCO_CLASSES;
use crate::shared::frame::Frame;

/// Fallback input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Default minimum class score for a box to be kept.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Leading box values per row: cx, cy, w, h.
const BOX_VALUES: usize = 4;

impl From<ort::Error> for DetectionError {
    fn from(e: ort::Error) -> Self {
        DetectionError::Inference(e.to_string())
    }
}

/// A loaded YOLO session plus the input resolution it expects.
///
/// `ort` sessions need exclusive access to run, so streams sharing the model
/// take turns through the mutex.
pub struct OnnxYoloModel {
    session: Mutex<ort::session::Session>,
    input_size: u32,
}

impl OnnxYoloModel {
    /// Build a session on the preferred execution provider and run one
    /// warm-up pass so backend initialization happens here, not on the
    /// first live frame.
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        let session =
            build_session(model_path).map_err(|e| ModelLoadError::Backend(e.to_string()))?;

        // Input shape is NCHW: [1, 3, H, W]. Dynamic or unreadable → 640.
        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        let model = Self {
            session: Mutex::new(session),
            input_size,
        };
        model
            .infer(&Frame::filled(input_size, input_size, [114, 114, 114], 0), 1.0)
            .map_err(|e| ModelLoadError::Backend(format!("warm-up inference failed: {e}")))?;
        log::info!(
            "Loaded {} ({}x{} input)",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(model)
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Runs the network and decodes rows above `confidence`, in frame
    /// coordinates, before NMS.
    fn infer(&self, frame: &Frame, confidence: f64) -> Result<Vec<RawDetection>, DetectionError> {
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| DetectionError::Inference(format!("Lock poisoned: {e}")))?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err(DetectionError::Inference(
                "YOLO model produced no outputs".into(),
            ));
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        let data = tensor
            .as_slice()
            .ok_or_else(|| DetectionError::Inference("Cannot get tensor slice".into()))?;

        decode_output(
            data,
            &shape,
            confidence,
            Letterbox {
                scale,
                pad_x,
                pad_y,
            },
        )
    }
}

fn build_session(model_path: &Path) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let session = ort::session::Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(model_path)?;
    Ok(session)
}

/// Builds the process's model manager for a YOLO model file.
///
/// `model` may be a path or a bare file name looked up in the model cache;
/// `url` is only used when the file is missing locally.
pub fn onnx_model_manager(model: String, url: Option<String>) -> ModelManager<OnnxYoloModel> {
    ModelManager::new(move || {
        let path = model_resolver::resolve(&model, url.as_deref())?;
        OnnxYoloModel::load(&path)
    })
}

/// Detector bound to a shared YOLO model.
pub struct OnnxYoloDetector {
    model: ModelHandle<OnnxYoloModel>,
    confidence: f64,
}

impl OnnxYoloDetector {
    pub fn new(model: ModelHandle<OnnxYoloModel>, confidence: f64) -> Self {
        Self { model, confidence }
    }
}

impl ObjectDetector for OnnxYoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if frame.is_unreadable() {
            return Err(DetectionError::empty_frame(frame));
        }
        let mut raw = self.model.infer(frame, self.confidence)?;
        let kept = nms(&mut raw, NMS_IOU_THRESH);
        Ok(to_detections(&kept, frame.width(), frame.height()))
    }
}

/// Creates `OnnxYoloDetector`s, loading the shared model on first use.
pub struct OnnxDetectorFactory {
    manager: Arc<ModelManager<OnnxYoloModel>>,
    confidence: f64,
}

impl OnnxDetectorFactory {
    pub fn new(manager: Arc<ModelManager<OnnxYoloModel>>, confidence: f64) -> Self {
        Self {
            manager,
            confidence,
        }
    }
}

impl DetectorFactory for OnnxDetectorFactory {
    fn create(&self) -> Result<Box<dyn ObjectDetector>, ModelLoadError> {
        let model = self.manager.ensure_loaded()?;
        Ok(Box::new(OnnxYoloDetector::new(model, self.confidence)))
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray, the YOLO convention
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray(); // [H, W, C] u8
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    // Nearest-neighbor resize into the padded region
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

#[derive(Clone, Debug)]
struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
    class_id: usize,
}

/// Decodes a YOLO head of shape `[1, 4 + classes, N]` (v8/v11 export) or
/// `[1, N, 4 + classes]`.
fn decode_output(
    data: &[f32],
    shape: &[usize],
    confidence: f64,
    lb: Letterbox,
) -> Result<Vec<RawDetection>, DetectionError> {
    if shape.len() != 3 {
        return Err(DetectionError::Inference(format!(
            "Unexpected YOLO output shape: {shape:?}"
        )));
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats <= BOX_VALUES || data.len() < num_dets * num_feats {
        return Err(DetectionError::Inference(format!(
            "YOLO output too small for shape {shape:?}"
        )));
    }

    let value = |det: usize, feat: usize| -> f64 {
        if transposed {
            data[feat * num_dets + det] as f64
        } else {
            data[det * num_feats + feat] as f64
        }
    };

    let mut raw = Vec::new();
    for i in 0..num_dets {
        let (class_id, score) = (BOX_VALUES..num_feats)
            .map(|f| (f - BOX_VALUES, value(i, f)))
            .fold((0, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < confidence {
            continue;
        }

        let cx = value(i, 0);
        let cy = value(i, 1);
        let w = value(i, 2);
        let h = value(i, 3);

        // Letterbox coords back to frame coords
        raw.push(RawDetection {
            x1: ((cx - w / 2.0) - lb.pad_x as f64) / lb.scale,
            y1: ((cy - h / 2.0) - lb.pad_y as f64) / lb.scale,
            x2: ((cx + w / 2.0) - lb.pad_x as f64) / lb.scale,
            y2: ((cy + h / 2.0) - lb.pad_y as f64) / lb.scale,
            confidence: score,
            class_id,
        });
    }
    Ok(raw)
}

/// Greedy class-aware NMS: sort by confidence descending, suppress
/// overlapping boxes of the same class.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];

    for i in 0..dets.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(dets[i].clone());
        for j in (i + 1)..dets.len() {
            if suppressed[j] || dets[j].class_id != dets[i].class_id {
                continue;
            }
            let iou = bbox_iou(
                &[dets[i].x1, dets[i].y1, dets[i].x2, dets[i].y2],
                &[dets[j].x1, dets[j].y1, dets[j].x2, dets[j].y2],
            );
            if iou > iou_thresh {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// Clamps boxes to the frame and labels them; boxes with nothing left
/// inside the frame are dropped.
fn to_detections(raw: &[RawDetection], frame_w: u32, frame_h: u32) -> Vec<Detection> {
    raw.iter()
        .filter_map(|d| {
            let bbox = BoundingBox::from_corners(d.x1, d.y1, d.x2, d.y2).clamp_to(frame_w, frame_h);
            if bbox.is_degenerate() {
                return None;
            }
            let label = COCO_CLASSES
                .get(d.class_id)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("class_{}", d.class_id));
            Some(Detection::new(label, d.confidence, bbox))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
