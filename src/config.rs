//! 命令行参数、环境变量与默认配置。

use clap::{Parser, Subcommand, ValueEnum};
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const MEDIA_DOCUMENT: &str = "media.json";
pub const REACTIONS_DOCUMENT: &str = "reactions.json";
pub const AUTH_COOKIE_NAME: &str = "GALLERY_SESSION";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_UPLOAD_MAX_FILES: usize = 10;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;
pub const DEFAULT_HEIC_PROGRAM: &str = "heif-convert";
pub const DEFAULT_HEIC_ARGS: &str = "-q 100 {input} {output}";
pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";
pub const DEFAULT_FFMPEG_ARGS: &str =
    "-nostdin -loglevel error -n -i {input} -vcodec libx264 -acodec aac {output}";
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;

/// CLI arguments and environment configuration for the gallery.
#[derive(Parser, Debug)]
#[command(name = "hyper-gallery", version = VERSION_INFO, about = "Self-hosted photo/video gallery")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
    #[arg(
        short = 'd',
        long,
        env = "GALLERY_DATA_DIR",
        default_value = ".",
        global = true,
        help = "Directory holding media.json and reactions.json"
    )]
    pub data_dir: String,
    #[arg(
        short = 'u',
        long,
        env = "GALLERY_UPLOADS_DIR",
        default_value = "uploads",
        global = true,
        help = "Flat directory for uploaded media"
    )]
    pub uploads_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "GALLERY_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "GALLERY_PORT",
        default_value_t = 3030,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "UPLOAD_PASSWORD",
        hide_env_values = true,
        help = "Password for the upload form (uploads stay locked when unset)"
    )]
    pub upload_password: Option<String>,
    #[arg(
        long,
        env = "GALLERY_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        help = "Upload session lifetime in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "GALLERY_UPLOAD_MAX_FILES",
        default_value_t = DEFAULT_UPLOAD_MAX_FILES,
        help = "Max files per upload request"
    )]
    pub upload_max_files: usize,
    #[arg(
        long,
        env = "GALLERY_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "GALLERY_HEIC_PROGRAM",
        default_value = DEFAULT_HEIC_PROGRAM,
        global = true,
        help = "HEIC to JPEG converter executable"
    )]
    pub heic_program: String,
    #[arg(
        long,
        env = "GALLERY_HEIC_ARGS",
        default_value = DEFAULT_HEIC_ARGS,
        global = true,
        help = "HEIC converter arguments ({input} and {output} are substituted)"
    )]
    pub heic_args: String,
    #[arg(
        long,
        env = "GALLERY_FFMPEG_PROGRAM",
        default_value = DEFAULT_FFMPEG_PROGRAM,
        global = true,
        help = "MOV to MP4 transcoder executable"
    )]
    pub ffmpeg_program: String,
    #[arg(
        long,
        env = "GALLERY_FFMPEG_ARGS",
        default_value = DEFAULT_FFMPEG_ARGS,
        global = true,
        help = "MOV transcoder arguments ({input} and {output} are substituted)"
    )]
    pub ffmpeg_args: String,
    #[arg(
        long,
        env = "GALLERY_CONVERT_TIMEOUT_SECS",
        default_value_t = 0,
        global = true,
        help = "Kill a converter after this many seconds (0 to disable)"
    )]
    pub convert_timeout_secs: u64,
    #[arg(
        long,
        env = "GALLERY_REDIRECT_FROM_HOST",
        help = "Host header (e.g. example.net:3030) to redirect to the canonical URL"
    )]
    pub redirect_from_host: Option<String>,
    #[arg(
        long,
        env = "GALLERY_CANONICAL_URL",
        help = "Canonical base URL, e.g. https://gallery.example.net"
    )]
    pub canonical_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert legacy files already listed in media.json, then rewrite it.
    Migrate {
        #[arg(value_enum)]
        format: MigrateFormat,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrateFormat {
    Heic,
    Mov,
}
