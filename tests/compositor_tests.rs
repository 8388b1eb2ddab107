use callfx::compositor::{
    fit_background, BackgroundImage, BlendPolicy, CompositeSettings, CompositorKind, FitMode, SegmentationCompositor,
};
use callfx::detection::Mask;
use callfx::format::CanonicalBuffer;
use callfx::{Rotation, Timestamp};
use image::{Rgba, RgbaImage};

fn foreground(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| Rgba([(x % 251) as u8, (y % 241) as u8, 200, 255]))
}

fn background(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| Rgba([30, (x % 256) as u8, (y % 256) as u8, 255]))
}

fn buffer(image: RgbaImage, rotation: Rotation) -> CanonicalBuffer {
    CanonicalBuffer::new(image, rotation, Timestamp::from_nanos(42))
}

fn compositors() -> Vec<SegmentationCompositor> {
    vec![
        SegmentationCompositor::new(CompositorKind::Cpu),
        SegmentationCompositor::new(CompositorKind::Parallel { threads: 4 }),
    ]
}

#[test]
fn certain_foreground_keeps_the_frame() {
    let bg = BackgroundImage::upright(background(40, 30));
    for compositor in compositors() {
        let out = compositor.compose(
            buffer(foreground(64, 36), Rotation::Deg0),
            &Mask::uniform(16, 9, 1.0),
            &bg,
            &CompositeSettings::default(),
        );
        assert_eq!(out.image(), &foreground(64, 36), "{}", compositor.backend_name());
        assert_eq!(out.timestamp(), Timestamp::from_nanos(42));
    }
}

#[test]
fn certain_background_yields_the_fitted_background() {
    let bg = BackgroundImage::upright(background(40, 30));
    for compositor in compositors() {
        for policy in [BlendPolicy::HardThreshold, BlendPolicy::SoftAlpha] {
            let settings = CompositeSettings {
                policy,
                ..Default::default()
            };
            let out = compositor.compose(
                buffer(foreground(64, 36), Rotation::Deg0),
                &Mask::uniform(16, 9, 0.0),
                &bg,
                &settings,
            );
            let expected = fit_background(bg.image(), 64, 36, FitMode::Contain, Rotation::Deg0);
            assert_eq!(out.image(), &expected, "{} {:?}", compositor.backend_name(), policy);
        }
    }
}

#[test]
fn disc_mask_over_letterboxed_background() {
    let (width, height) = (1920, 1080);
    let bg = BackgroundImage::upright(background(800, 600));
    // Person disc of radius 100 in a quarter-resolution mask
    let mask = Mask::from_fn(480, 270, |x, y| {
        let (dx, dy) = (x as f32 - 240.0, y as f32 - 135.0);
        if dx * dx + dy * dy <= 100.0 * 100.0 {
            1.0
        } else {
            0.0
        }
    });
    let settings = CompositeSettings {
        threshold: 0.5,
        policy: BlendPolicy::HardThreshold,
        fit: Some(FitMode::Contain),
    };
    let fg = foreground(width, height);
    let fitted = fit_background(bg.image(), width, height, FitMode::Contain, Rotation::Deg0);

    // 800x600 scales to 1440x1080, leaving 240 px bars on both sides
    assert_eq!(*fitted.get_pixel(100, 540), Rgba([0, 0, 0, 255]));
    assert_ne!(*fitted.get_pixel(960, 20), Rgba([0, 0, 0, 255]));

    for compositor in compositors() {
        let out = compositor.compose(buffer(fg.clone(), Rotation::Deg0), &mask, &bg, &settings);
        let out = out.image();
        assert_eq!(out.dimensions(), (width, height));

        for (x, y, pixel) in out.enumerate_pixels() {
            let expected = if mask.get(x / 4, y / 4) >= 0.5 {
                fg.get_pixel(x, y)
            } else {
                fitted.get_pixel(x, y)
            };
            assert_eq!(pixel, expected, "{} at ({}, {})", compositor.backend_name(), x, y);
        }
        assert_eq!(out.get_pixel(960, 540), fg.get_pixel(960, 540));
        assert_eq!(*out.get_pixel(100, 540), Rgba([0, 0, 0, 255]));
    }
}

#[test]
fn portrait_buffers_crop_instead_of_letterboxing() {
    // Sensor-oriented buffer that displays rotated by 90 degrees
    let bg = BackgroundImage::upright(background(60, 40));
    let compositor = SegmentationCompositor::new(CompositorKind::Cpu);
    let out = compositor.compose(
        buffer(foreground(48, 32), Rotation::Deg90),
        &Mask::uniform(12, 8, 0.0),
        &bg,
        &CompositeSettings::default(),
    );
    let expected = fit_background(bg.image(), 48, 32, FitMode::Cover, Rotation::Deg90);
    assert_eq!(out.image(), &expected);
    assert_eq!(out.rotation(), Rotation::Deg90);
    assert!(out.image().pixels().all(|p| *p != Rgba([0, 0, 0, 255])));
}

#[test]
fn soft_alpha_mixes_by_probability() {
    let bg = BackgroundImage::upright(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
    let compositor = SegmentationCompositor::new(CompositorKind::Cpu);
    let settings = CompositeSettings {
        policy: BlendPolicy::SoftAlpha,
        ..Default::default()
    };
    let out = compositor.compose(
        buffer(RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 255])), Rotation::Deg0),
        &Mask::uniform(4, 4, 0.5),
        &bg,
        &settings,
    );
    assert_eq!(*out.image().get_pixel(3, 3), Rgba([100, 50, 25, 255]));
}
