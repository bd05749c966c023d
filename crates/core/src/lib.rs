//! Real-time helmet detection: sample a camera, find people, check their
//! heads for hard-hat colors and raise debounced alerts.

pub mod alerting {
    pub mod domain {
        pub mod alert_debouncer;
        pub mod alert_sink;
        pub mod detection_event;
    }
    pub mod infrastructure;
}

pub mod classification {
    pub mod domain {
        pub mod head_region_classifier;
        pub mod ppe_classifier;
        pub mod safety_color;
    }
}

pub mod detection {
    pub mod domain {
        pub mod detection;
        pub mod model_manager;
        pub mod object_detector;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod alert_dispatcher;
    pub mod detection_cycle;
    pub mod detection_loop;
    pub mod pipeline_logger;
    pub mod status_board;
    pub mod status_poller;
}

pub mod shared {
    pub mod bbox;
    pub mod clock;
    pub mod config;
    pub mod constants;
    pub mod frame;
}

pub mod video {
    pub mod domain {
        pub mod frame_source;
        pub mod snapshot_writer;
    }
    pub mod infrastructure;
}
