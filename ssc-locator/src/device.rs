//! 推理设备选择与设备利用率采样.
//!
//! 设备在进程内只探测一次, 之后作为显式参数传给评估器.
//! 利用率采样是旁路的、尽力而为的观测行为, 与定位结果的正确性无关.

use crate::consts::{PROBE_INTERVAL_MS, PROBE_SAMPLES};
use crate::error::BoxedError;
use once_cell::sync::OnceCell;
use std::env;
use std::fmt;
use std::process::Command;
use std::thread;
use std::time::Duration;

/// 推理设备.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Device {
    /// GPU 等加速器.
    Accelerator,

    /// CPU 回退路径.
    Cpu,
}

static DETECTED: OnceCell<Device> = OnceCell::new();

impl Device {
    /// 探测本机可用的推理设备. 结果在进程内缓存, 后续调用不会重新探测.
    ///
    /// `CUDA_VISIBLE_DEVICES` 为空或为 `-1` 时直接使用 CPU; 否则只要 `nvidia-smi -L`
    /// 列出了至少一块 GPU 就使用加速器.
    pub fn detect() -> Device {
        *DETECTED.get_or_init(|| {
            let device = if visible_devices_disabled(env::var("CUDA_VISIBLE_DEVICES").ok()) {
                Device::Cpu
            } else {
                match Command::new("nvidia-smi").arg("-L").output() {
                    Ok(out) if out.status.success() && count_gpus(&out.stdout) > 0 => {
                        Device::Accelerator
                    }
                    _ => Device::Cpu,
                }
            };
            tracing::info!(?device, "inference device selected");
            device
        })
    }

    /// 是否为加速器.
    #[inline]
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Self::Accelerator)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerator => f.write_str("accelerator"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

fn visible_devices_disabled(var: Option<String>) -> bool {
    match var {
        Some(v) => {
            let v = v.trim();
            v.is_empty() || v == "-1"
        }
        None => false,
    }
}

/// `nvidia-smi -L` 的每一行形如 `GPU 0: NVIDIA A100 (UUID: ...)`.
fn count_gpus(stdout: &[u8]) -> usize {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| l.trim_start().starts_with("GPU "))
        .count()
}

/// 一次设备利用率采样的汇总.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceUsage {
    /// 设备名称.
    pub name: String,

    /// 已用显存, 以 MB 为单位.
    pub memory_used_mb: f64,

    /// 总显存, 以 MB 为单位.
    pub memory_total_mb: f64,

    /// 平均利用率 (百分比).
    pub utilization: f64,
}

impl fmt::Display for DeviceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.2}/{:.2} MB, {:.1}%",
            self.name, self.memory_used_mb, self.memory_total_mb, self.utilization
        )
    }
}

/// 设备利用率探针.
pub trait UtilizationProbe {
    /// 采样设备利用率. 实现可以阻塞 (例如多次采样取平均).
    fn sample(&mut self) -> Result<DeviceUsage, BoxedError>;
}

impl<P: UtilizationProbe + ?Sized> UtilizationProbe for Box<P> {
    #[inline]
    fn sample(&mut self) -> Result<DeviceUsage, BoxedError> {
        (**self).sample()
    }
}

/// 通过 `nvidia-smi` 命令行采样 GPU 利用率.
///
/// 共采样 [`PROBE_SAMPLES`] 次, 间隔 [`PROBE_INTERVAL_MS`] 毫秒, 利用率取平均值,
/// 显存取最后一次的读数.
#[derive(Clone, Debug)]
pub struct NvidiaSmiProbe {
    gpu: u32,
    samples: u32,
    interval: Duration,
}

impl NvidiaSmiProbe {
    /// 采样第 `gpu` 块 GPU.
    pub fn new(gpu: u32) -> Self {
        Self {
            gpu,
            samples: PROBE_SAMPLES,
            interval: Duration::from_millis(PROBE_INTERVAL_MS),
        }
    }

    fn query_once(&self) -> Result<DeviceUsage, BoxedError> {
        let out = Command::new("nvidia-smi")
            .arg(format!("--id={}", self.gpu))
            .arg("--query-gpu=name,memory.used,memory.total,utilization.gpu")
            .arg("--format=csv,noheader,nounits")
            .output()?;
        if !out.status.success() {
            return Err(format!("nvidia-smi exited with {}", out.status).into());
        }
        parse_query(&out.stdout)
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new(0)
    }
}

impl UtilizationProbe for NvidiaSmiProbe {
    fn sample(&mut self) -> Result<DeviceUsage, BoxedError> {
        let mut last = self.query_once()?;
        let mut util = last.utilization;
        for _ in 1..self.samples {
            thread::sleep(self.interval);
            last = self.query_once()?;
            util += last.utilization;
        }
        last.utilization = util / self.samples.max(1) as f64;
        Ok(last)
    }
}

/// 解析 `nvidia-smi --format=csv,noheader,nounits` 的第一行输出.
fn parse_query(stdout: &[u8]) -> Result<DeviceUsage, BoxedError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(stdout);
    let record = rdr
        .records()
        .next()
        .ok_or("nvidia-smi reported no device")??;
    if record.len() < 4 {
        return Err(format!("unexpected nvidia-smi output: {record:?}").into());
    }
    Ok(DeviceUsage {
        name: record[0].to_string(),
        memory_used_mb: record[1].parse()?,
        memory_total_mb: record[2].parse()?,
        utilization: record[3].parse()?,
    })
}

/// 在分离的后台线程上运行 `probe`. 不会等待该线程, 也不会观察其结果.
///
/// 采样结果和失败都只写入日志; 线程创建失败同样只记录日志.
pub fn spawn_detached<P>(mut probe: P)
where
    P: UtilizationProbe + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("utilization-probe".into())
        .spawn(move || match probe.sample() {
            Ok(usage) => tracing::info!(%usage, "device utilization"),
            Err(e) => tracing::warn!(error = %e, "device utilization probe failed"),
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to spawn utilization probe");
    }
}
