//! 上色模型封装
//!
//! 对应外部协作方（模型仓库）暴露的三个能力：预处理、前向推理、后处理。
//! 预处理/后处理在本地实现，前向推理通过 [`AbPredictor`] 抽象，
//! 生产环境由 ONNX Runtime 会话承担，测试可注入确定性桩实现。
//!
//! 数据约定：
//! - 预处理输出归一化 L 通道 `(L - 50) / 100`，形状 `(1, 1, ws, ws)`；
//! - 前向输出 ab 色度平面（Lab 实际量纲），形状 `(1, 2, h, w)`；
//! - 后处理把 ab 双线性放大回原始分辨率，与原始 L 重组后转回 RGB。

use std::path::Path;
use std::sync::Mutex;

use image::{Rgb, RgbImage, imageops};
use ndarray::{Array2, Array4, Axis, Ix4};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Value;

use crate::config::{ModelConfig, ModelDevice};
use crate::error::AppError;

/// L 通道归一化中心值
pub const L_CENTER: f32 = 50.0;
/// L 通道归一化分母
pub const L_NORM: f32 = 100.0;

/// ab 平面预测抽象
///
/// 输入：归一化 L，形状 `(1, 1, ws, ws)`；输出：ab 平面，形状 `(1, 2, h, w)`。
pub trait AbPredictor: Send + Sync {
    fn predict(&self, l_norm: Array4<f32>) -> Result<Array4<f32>, AppError>;
}

/// 基于 ONNX Runtime 的 ab 预测器
pub struct OnnxPredictor {
    /// ort 的 `run` 需要 `&mut`，用互斥锁串行化并发请求的前向调用。
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxPredictor {
    /// 加载 ONNX 权重并构建会话，随后用全零输入做一次形状自检。
    ///
    /// 设备按配置选择：`cuda` 需要启用同名 feature，初始化失败时回退 CPU。
    pub fn load(weights_path: &Path, model: &ModelConfig) -> Result<Self, AppError> {
        if !weights_path.exists() {
            return Err(AppError::Internal(format!(
                "未找到 ONNX 权重文件: {}",
                weights_path.display()
            )));
        }

        let intra_threads = if model.intra_threads == 0 {
            num_cpus::get()
        } else {
            model.intra_threads as usize
        };

        let mut session = Self::build_session(weights_path, model.device, intra_threads)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| AppError::Model("模型没有任何输入".to_string()))?;

        // 形状自检：确认输出确实是两个 ab 平面，提早暴露权重/图不匹配的问题。
        {
            let ws = model.working_size as usize;
            let probe = Array4::<f32>::zeros((1, 1, ws, ws));
            let outputs = session.run(ort::inputs![input_name.as_str() => Value::from_array(probe)?])?;
            let out = outputs[0].try_extract_array::<f32>()?;
            let shape = out.shape();
            if shape.len() != 4 || shape[1] != 2 {
                return Err(AppError::Model(format!(
                    "模型输出形状异常: {shape:?}（预期 [1, 2, h, w]）"
                )));
            }
        }

        tracing::info!(
            "ONNX 上色模型加载完成: {}（input = {}, intra_threads = {}）",
            weights_path.display(),
            input_name,
            intra_threads
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }

    #[cfg(feature = "cuda")]
    fn build_session(
        weights_path: &Path,
        device: ModelDevice,
        intra_threads: usize,
    ) -> Result<Session, AppError> {
        use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};

        if device == ModelDevice::Cuda {
            // 先尝试 CUDA，失败回退 CPU。
            let cuda_result = Session::builder()?
                .with_execution_providers([CUDAExecutionProvider::default().build()])?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(intra_threads)?
                .commit_from_file(weights_path);
            match cuda_result {
                Ok(s) => {
                    tracing::info!("CUDA 执行提供器初始化成功");
                    return Ok(s);
                }
                Err(e) => {
                    tracing::warn!("CUDA 执行提供器初始化失败: {}，回退 CPU", e);
                }
            }
        }

        Ok(Session::builder()?
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(weights_path)?)
    }

    #[cfg(not(feature = "cuda"))]
    fn build_session(
        weights_path: &Path,
        device: ModelDevice,
        intra_threads: usize,
    ) -> Result<Session, AppError> {
        use ort::execution_providers::CPUExecutionProvider;

        if device == ModelDevice::Cuda {
            tracing::warn!("配置要求 CUDA，但未启用 cuda feature，回退 CPU");
        }

        Ok(Session::builder()?
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(weights_path)?)
    }
}

impl AbPredictor for OnnxPredictor {
    fn predict(&self, l_norm: Array4<f32>) -> Result<Array4<f32>, AppError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| AppError::Internal("模型会话锁被毒化".to_string()))?;
        let outputs =
            session.run(ort::inputs![self.input_name.as_str() => Value::from_array(l_norm)?])?;
        let out = outputs[0].try_extract_array::<f32>()?;
        out.to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| AppError::Model(format!("模型输出维度异常: {e}")))
    }
}

/// 预处理结果：原始分辨率 L 平面 + 工作分辨率归一化 L 张量
pub struct PreparedImage {
    /// L 通道（Lab 量纲，0..100），形状 `(H, W)`
    pub l_orig: Array2<f32>,
    /// 归一化 L 通道，形状 `(1, 1, ws, ws)`
    pub l_rs: Array4<f32>,
}

/// 进程级单例的上色器：预处理 → 前向 → 后处理
pub struct Colorizer {
    predictor: Box<dyn AbPredictor>,
    working_size: u32,
}

impl Colorizer {
    pub fn new(predictor: Box<dyn AbPredictor>, working_size: u32) -> Self {
        Self {
            predictor,
            working_size,
        }
    }

    pub fn working_size(&self) -> u32 {
        self.working_size
    }

    /// 完整上色管线，几何尺寸保持不变。
    pub fn colorize(&self, img: &RgbImage) -> Result<RgbImage, AppError> {
        let prepared = self.preprocess(img);
        let ab = self.predictor.predict(prepared.l_rs.clone())?;
        self.postprocess(&prepared, &ab)
    }

    /// 预处理：取原始 L，同时把 RGB 缩放到工作分辨率再取归一化 L。
    pub fn preprocess(&self, img: &RgbImage) -> PreparedImage {
        let (width, height) = img.dimensions();
        let l_orig = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            let p = img.get_pixel(x as u32, y as u32);
            rgb_to_lab([p[0], p[1], p[2]])[0]
        });

        let ws = self.working_size;
        // Triangle 即双线性，与原服务的缩放行为一致。
        let resized = imageops::resize(img, ws, ws, imageops::FilterType::Triangle);
        let l_rs = Array4::from_shape_fn((1, 1, ws as usize, ws as usize), |(_, _, y, x)| {
            let p = resized.get_pixel(x as u32, y as u32);
            (rgb_to_lab([p[0], p[1], p[2]])[0] - L_CENTER) / L_NORM
        });

        PreparedImage { l_orig, l_rs }
    }

    /// 后处理：ab 放大到原始分辨率，与原始 L 重组并转回 RGB。
    pub fn postprocess(
        &self,
        prepared: &PreparedImage,
        ab: &Array4<f32>,
    ) -> Result<RgbImage, AppError> {
        let shape = ab.shape();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 2 {
            return Err(AppError::Model(format!(
                "模型输出形状异常: {shape:?}（预期 [1, 2, h, w]）"
            )));
        }

        let (height, width) = prepared.l_orig.dim();
        let planes = ab.index_axis(Axis(0), 0);
        let a_full = resize_plane_bilinear(&planes.index_axis(Axis(0), 0).to_owned(), height, width);
        let b_full = resize_plane_bilinear(&planes.index_axis(Axis(0), 1).to_owned(), height, width);

        Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let (yi, xi) = (y as usize, x as usize);
            Rgb(lab_to_rgb([
                prepared.l_orig[[yi, xi]],
                a_full[[yi, xi]],
                b_full[[yi, xi]],
            ]))
        }))
    }
}

/// 单平面双线性缩放（像素中心对齐）
fn resize_plane_bilinear(src: &Array2<f32>, dst_h: usize, dst_w: usize) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    if src_h == dst_h && src_w == dst_w {
        return src.clone();
    }

    let scale_y = src_h as f32 / dst_h as f32;
    let scale_x = src_w as f32 / dst_w as f32;

    Array2::from_shape_fn((dst_h, dst_w), |(y, x)| {
        let sy = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let sx = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
        let y0 = sy.floor() as usize;
        let x0 = sx.floor() as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let x1 = (x0 + 1).min(src_w - 1);
        let dy = sy - y0 as f32;
        let dx = sx - x0 as f32;

        let top = src[[y0, x0]] * (1.0 - dx) + src[[y0, x1]] * dx;
        let bottom = src[[y1, x0]] * (1.0 - dx) + src[[y1, x1]] * dx;
        top * (1.0 - dy) + bottom * dy
    })
}

// =============== sRGB (D65) <-> CIELAB ===============

const XN: f32 = 0.950_47;
const YN: f32 = 1.0;
const ZN: f32 = 1.088_83;

fn srgb_to_linear(u: f32) -> f32 {
    if u <= 0.04045 {
        u / 12.92
    } else {
        ((u + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    const DELTA: f32 = 6.0 / 29.0;
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    const DELTA: f32 = 6.0 / 29.0;
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

/// sRGB 像素转 CIELAB（L 0..100，ab 约 ±110）
pub fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let r = srgb_to_linear(rgb[0] as f32 / 255.0);
    let g = srgb_to_linear(rgb[1] as f32 / 255.0);
    let b = srgb_to_linear(rgb[2] as f32 / 255.0);

    let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
    let z = 0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b;

    let fx = lab_f(x / XN);
    let fy = lab_f(y / YN);
    let fz = lab_f(z / ZN);

    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// CIELAB 转 sRGB 像素，超出色域时裁剪到可显示范围
pub fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let fy = (lab[0] + 16.0) / 116.0;
    let fx = fy + lab[1] / 500.0;
    let fz = fy - lab[2] / 200.0;

    let x = XN * lab_f_inv(fx);
    let y = YN * lab_f_inv(fy);
    let z = ZN * lab_f_inv(fz);

    let r_lin = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
    let g_lin = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
    let b_lin = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

    let to_u8 = |v: f32| -> u8 {
        (linear_to_srgb(v.clamp(0.0, 1.0)) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    };

    [to_u8(r_lin), to_u8(g_lin), to_u8(b_lin)]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 返回全零 ab 的确定性桩：输出应为同亮度的中性灰图
    struct NeutralPredictor {
        out_size: usize,
    }

    impl AbPredictor for NeutralPredictor {
        fn predict(&self, _l_norm: Array4<f32>) -> Result<Array4<f32>, AppError> {
            Ok(Array4::zeros((1, 2, self.out_size, self.out_size)))
        }
    }

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x + y) % 256) as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn lab_of_white_black_and_red_matches_reference() {
        let white = rgb_to_lab([255, 255, 255]);
        assert!((white[0] - 100.0).abs() < 0.1, "L(white) = {}", white[0]);
        assert!(white[1].abs() < 0.5 && white[2].abs() < 0.5);

        let black = rgb_to_lab([0, 0, 0]);
        assert!(black[0].abs() < 0.1);

        // 参考值：sRGB 纯红 ≈ (53.24, 80.09, 67.20)
        let red = rgb_to_lab([255, 0, 0]);
        assert!((red[0] - 53.24).abs() < 0.5, "L(red) = {}", red[0]);
        assert!((red[1] - 80.09).abs() < 0.5, "a(red) = {}", red[1]);
        assert!((red[2] - 67.20).abs() < 0.5, "b(red) = {}", red[2]);
    }

    #[test]
    fn lab_round_trip_is_close() {
        for rgb in [[12u8, 200, 99], [255, 128, 0], [7, 7, 7], [250, 250, 251]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for c in 0..3 {
                let diff = (back[c] as i16 - rgb[c] as i16).abs();
                assert!(diff <= 1, "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn gray_pixels_have_near_zero_chroma() {
        for v in [30u8, 119, 200] {
            let lab = rgb_to_lab([v, v, v]);
            assert!(lab[1].abs() < 0.05 && lab[2].abs() < 0.05, "{lab:?}");
        }
    }

    #[test]
    fn resize_plane_identity_when_same_size() {
        let src = Array2::from_shape_fn((4, 5), |(y, x)| (y * 5 + x) as f32);
        let out = resize_plane_bilinear(&src, 4, 5);
        assert_eq!(src, out);
    }

    #[test]
    fn resize_plane_preserves_constant_value() {
        let src = Array2::from_elem((8, 8), 42.5f32);
        let out = resize_plane_bilinear(&src, 31, 17);
        assert_eq!(out.dim(), (31, 17));
        for v in out.iter() {
            assert!((v - 42.5).abs() < 1e-4);
        }
    }

    #[test]
    fn preprocess_produces_working_size_tensor() {
        let colorizer = Colorizer::new(Box::new(NeutralPredictor { out_size: 16 }), 16);
        let img = gradient_image(40, 24);
        let prepared = colorizer.preprocess(&img);
        assert_eq!(prepared.l_orig.dim(), (24, 40));
        assert_eq!(prepared.l_rs.shape(), &[1, 1, 16, 16]);
        // 归一化范围：L∈[0,100] → [-0.5, 0.5]
        for v in prepared.l_rs.iter() {
            assert!((-0.5..=0.5).contains(v), "normalized L out of range: {v}");
        }
    }

    #[test]
    fn colorize_preserves_geometry() {
        let colorizer = Colorizer::new(Box::new(NeutralPredictor { out_size: 16 }), 16);
        let img = gradient_image(33, 21);
        let out = colorizer.colorize(&img).expect("colorize");
        assert_eq!(out.dimensions(), (33, 21));
    }

    #[test]
    fn neutral_ab_keeps_pixels_gray() {
        let colorizer = Colorizer::new(Box::new(NeutralPredictor { out_size: 8 }), 8);
        let img = gradient_image(12, 12);
        let out = colorizer.colorize(&img).expect("colorize");
        for p in out.pixels() {
            let max = p.0.iter().copied().max().unwrap() as i16;
            let min = p.0.iter().copied().min().unwrap() as i16;
            assert!(max - min <= 2, "expected near-gray pixel, got {:?}", p.0);
        }
    }

    #[test]
    fn postprocess_rejects_wrong_channel_count() {
        let colorizer = Colorizer::new(Box::new(NeutralPredictor { out_size: 8 }), 8);
        let img = gradient_image(10, 10);
        let prepared = colorizer.preprocess(&img);
        let bad = Array4::<f32>::zeros((1, 3, 8, 8));
        let err = colorizer.postprocess(&prepared, &bad).unwrap_err();
        assert!(matches!(err, AppError::Model(_)));
    }
}
