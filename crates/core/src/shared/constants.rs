/// COCO-80 YOLO export used for person detection.
pub const YOLO_MODEL_NAME: &str = "yolo11n.onnx";

pub const PERSON_CLASS: &str = "person";

pub const DEFAULT_DETECTION_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_ALERT_DEBOUNCE_MS: u64 = 5000;
pub const DEFAULT_STATUS_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_HELMET_COLOR_RATIO_THRESHOLD: f64 = 0.15;
pub const DEFAULT_HEAD_REGION_FRACTION: f64 = 0.25;
pub const DEFAULT_HEAD_REGION_WIDTH_FRACTION: f64 = 0.5;

pub const DEFAULT_ZONE: &str = "Live Webcam";
pub const DEFAULT_WORKER: &str = "Unknown Worker";
pub const DEFAULT_STREAM_KEY: &str = "default";

pub const HELMET_MISSING_EVENT_TYPE: &str = "Helmet Missing";

/// Alert `type` values (compared case-insensitively) that mean a worker was
/// seen without a helmet.
pub const HELMET_VIOLATION_TYPES: &[&str] = &["no_helmet", "helmet_missing", "helmet missing"];

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];
