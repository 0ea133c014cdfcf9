// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand};
use edgefirst_velodyne::{
    CloudConfig, Error, FilterConfig, FilterWindow, RadiusMode, SensorModel, StaticTransform,
    velodyne::DATA_PORT,
};
use serde_json::json;
use std::f32::consts::TAU;
use tracing::level_filters::LevelFilter;
use zenoh::{
    Session,
    config::{Config, WhatAmI},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Application log level
    #[arg(long, env, default_value = "info", global = true)]
    pub rust_log: LevelFilter,

    #[command(flatten)]
    pub zenoh: ZenohArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Decode Velodyne packets and publish point clouds
    Cloud(CloudArgs),
    /// Filter and transform published point clouds into another frame
    Filter(FilterArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct CloudArgs {
    /// Sensor hostname or IP address, or a pcap capture to replay.  Without a
    /// target, data packets from any sender are accepted.
    #[arg(env)]
    pub target: Option<String>,

    /// Velodyne sensor model
    #[arg(long, env, default_value = "vlp16")]
    pub model: SensorModel,

    /// UDP data port
    #[arg(long, env, default_value_t = DATA_PORT)]
    pub port: u16,

    /// Sensor rotation rate in revolutions per minute
    #[arg(long, env, default_value = "600")]
    pub rpm: f32,

    /// Maximum number of points per published cloud
    #[arg(long, env, default_value = "55000")]
    pub cloud_size: usize,

    /// Include the laser ring of each point in the published clouds
    #[arg(long, env)]
    pub ring_information: bool,

    /// The name of the lidar frame
    #[arg(long, env, default_value = "lidar")]
    pub frame_id: String,

    /// Point cloud topic
    #[arg(long, env, default_value = "rt/lidar/points")]
    pub topic: String,
}

impl CloudArgs {
    pub fn config(&self) -> CloudConfig {
        CloudConfig {
            model: self.model,
            rpm: self.rpm,
            cloud_size: self.cloud_size,
            ring_information: self.ring_information,
            frame_id: self.frame_id.clone(),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct FilterArgs {
    /// Frame the incoming clouds must be in
    #[arg(long, env, default_value = "lidar")]
    pub input_frame_id: String,

    /// Frame of the published clouds
    #[arg(long, env, default_value = "base_link")]
    pub output_frame_id: String,

    /// Incoming point cloud topic
    #[arg(long, env, default_value = "rt/lidar/points")]
    pub raw_topic: String,

    /// Filtered point cloud topic
    #[arg(long, env, default_value = "rt/lidar/filtered")]
    pub filtered_topic: String,

    /// Start of the kept bearing window in radians, counter-clockwise from +X
    #[arg(long, env, default_value = "0", allow_negative_numbers = true)]
    pub start_angle: f32,

    /// End of the kept bearing window in radians.  The window wraps through
    /// zero when it is smaller than the start angle.
    #[arg(long, env, default_value_t = TAU, allow_negative_numbers = true)]
    pub end_angle: f32,

    /// Minimum kept radius in meters
    #[arg(long, env, default_value = "0")]
    pub min_radius: f32,

    /// Maximum kept radius in meters
    #[arg(long, env, default_value = "inf")]
    pub max_radius: f32,

    /// Distance used for the radius limits
    #[arg(long, env, default_value = "planar")]
    pub radius_mode: RadiusMode,

    /// Maximum number of points per filtered cloud
    #[arg(long, env, default_value = "55000")]
    pub pcl_size: usize,

    /// Frame transformation quaternion from the input to the output frame
    #[arg(
        long,
        env,
        default_value = "0 0 0 1",
        value_delimiter = ' ',
        num_args = 4,
        allow_negative_numbers = true
    )]
    pub tf_quat: Vec<f32>,

    /// Frame transformation vector from the input to the output frame
    #[arg(
        long,
        env,
        default_value = "0 0 0",
        value_delimiter = ' ',
        num_args = 3,
        allow_negative_numbers = true
    )]
    pub tf_vec: Vec<f32>,
}

impl FilterArgs {
    pub fn config(&self) -> Result<FilterConfig, Error> {
        let quaternion: [f32; 4] = self.tf_quat.as_slice().try_into().map_err(|_| {
            Error::Config(format!("tf_quat needs 4 values, got {}", self.tf_quat.len()))
        })?;
        let translation: [f32; 3] = self.tf_vec.as_slice().try_into().map_err(|_| {
            Error::Config(format!("tf_vec needs 3 values, got {}", self.tf_vec.len()))
        })?;

        Ok(FilterConfig {
            input_frame_id: self.input_frame_id.clone(),
            output_frame_id: self.output_frame_id.clone(),
            window: FilterWindow::new(
                self.start_angle,
                self.end_angle,
                self.min_radius,
                self.max_radius,
                self.radius_mode,
            )?,
            transform: StaticTransform::new(quaternion, translation)?,
            pcl_size: self.pcl_size,
        })
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ZenohArgs {
    /// zenoh connection mode
    #[arg(long, env, default_value = "peer", global = true)]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env, global = true)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env, global = true)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env, global = true)]
    no_multicast_scouting: bool,
}

impl TryFrom<&ZenohArgs> for Config {
    type Error = Error;

    fn try_from(args: &ZenohArgs) -> Result<Self, Self::Error> {
        let mut config = Config::default();
        let mut insert = |key: &str, value: serde_json::Value| {
            config
                .insert_json5(key, &value.to_string())
                .map_err(|e| Error::Config(format!("zenoh {}: {:?}", key, e)))
        };

        insert("mode", json!(args.mode))?;

        if !args.connect.is_empty() {
            insert("connect/endpoints", json!(args.connect))?;
        }

        if !args.listen.is_empty() {
            insert("listen/endpoints", json!(args.listen))?;
        }

        if args.no_multicast_scouting {
            insert("scouting/multicast/enabled", json!(false))?;
        }

        insert("scouting/multicast/interface", json!("lo"))?;

        Ok(config)
    }
}

/// Open the zenoh session described by `args`.
pub async fn open_session(args: &ZenohArgs) -> Result<Session, Error> {
    let config = Config::try_from(args)?;
    zenoh::open(config)
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_router_is_transport_error() {
        let args = Args::try_parse_from([
            "velodynepub",
            "--mode",
            "client",
            "--connect",
            "tcp/127.0.0.1:1",
            "--no-multicast-scouting",
            "cloud",
        ])
        .unwrap();
        let Err(err) = open_session(&args.zenoh).await else {
            panic!("client session opened without a router");
        };
        assert!(matches!(err, Error::Transport(_)), "{:?}", err);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_cloud_defaults() {
        let args = Args::try_parse_from(["velodynepub", "cloud"]).unwrap();
        let Command::Cloud(cloud) = args.command else {
            panic!("expected cloud command");
        };
        let config = cloud.config();
        assert_eq!(config, CloudConfig::default());
        assert_eq!(cloud.port, 2368);
        assert!(cloud.target.is_none());
    }

    #[test]
    fn test_cloud_options() {
        let args = Args::try_parse_from([
            "velodynepub",
            "cloud",
            "192.168.1.201",
            "--model",
            "vls128",
            "--rpm",
            "1200",
            "--ring-information",
            "--mode",
            "client",
        ])
        .unwrap();
        let Command::Cloud(cloud) = args.command else {
            panic!("expected cloud command");
        };
        assert_eq!(cloud.target.as_deref(), Some("192.168.1.201"));
        assert_eq!(cloud.model, SensorModel::Vls128);
        assert!(cloud.config().ring_information);
        assert_eq!(cloud.config().rpm, 1200.0);
        assert!(Config::try_from(&args.zenoh).is_ok());
    }

    #[test]
    fn test_unknown_model_rejected() {
        assert!(Args::try_parse_from(["velodynepub", "cloud", "--model", "hdl64"]).is_err());
    }

    #[test]
    fn test_filter_options() {
        let args = Args::try_parse_from([
            "velodynepub",
            "filter",
            "--start-angle",
            "-1.5",
            "--end-angle",
            "1.5",
            "--max-radius",
            "50",
            "--radius-mode",
            "spherical",
            "--tf-quat",
            "0",
            "0",
            "0.7071068",
            "0.7071068",
            "--tf-vec",
            "1.5",
            "0",
            "-0.25",
        ])
        .unwrap();
        let Command::Filter(filter) = args.command else {
            panic!("expected filter command");
        };
        let config = filter.config().unwrap();
        assert_eq!(config.window.radius_mode(), RadiusMode::Spherical);
        assert!(config.window.contains_bearing(0.0));
        assert!(!config.window.contains_bearing(3.0));
        assert_eq!(config.output_frame_id, "base_link");
        assert_eq!(config.transform.isometry().translation.vector.z, -0.25);
    }

    #[test]
    fn test_filter_defaults_keep_everything() {
        let args = Args::try_parse_from(["velodynepub", "filter"]).unwrap();
        let Command::Filter(filter) = args.command else {
            panic!("expected filter command");
        };
        let config = filter.config().unwrap();
        assert_eq!(config.window, FilterWindow::full());
        assert_eq!(config.transform, StaticTransform::identity());
    }
}
