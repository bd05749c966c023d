pub mod annotated_snapshot_writer;
pub mod http_snapshot_source;
pub mod image_file_source;
