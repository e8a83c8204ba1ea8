use ash::vk;
use vireo_core::{PixelRegion, Vertex};
use vireo_gpu::{DeviceBuffer, DeviceImage, GpuError, RenderDevice};
use vireo_render::{packed_region, StreamingUploader, Uploader};
use vireo_test::{content_hash, FaultPoint, HandleKind, MockDevice, Op};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[test]
fn buffer_upload_round_trips() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();

    for len in [1, 4096, 3001] {
        let data = pattern(len, 7);
        let buffer = uploader
            .upload_buffer(&device, &data, vk::BufferUsageFlags::VERTEX_BUFFER, "round_trip")
            .unwrap();
        assert_eq!(buffer.size(), len as u64);
        assert_eq!(uploader.read_back_buffer(&device, &buffer, len).unwrap(), data);
        device.destroy_buffer(buffer);
    }

    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn blocking_upload_waits_on_its_fence_not_the_queue() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    device.clear_ops();

    let buffer = uploader
        .upload_vertices(&device, &[Vertex::default(); 3], "triangle")
        .unwrap();
    let ops = device.ops();
    assert!(ops.iter().any(|op| matches!(op, Op::WaitFence(_))));
    assert!(!ops.iter().any(Op::is_full_wait));
    assert_eq!(device.pending_submissions(), 0);
    assert_eq!(device.live_of(HandleKind::Buffer), 1);

    device.destroy_buffer(buffer);
    uploader.destroy(&device);
    device.assert_clean();
}

#[test]
fn empty_upload_is_rejected() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let result = uploader.upload_buffer(&device, &[], vk::BufferUsageFlags::VERTEX_BUFFER, "empty");
    assert!(matches!(result, Err(GpuError::Upload(_))));
    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
}

#[test]
fn failed_upload_leaves_nothing_behind() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let baseline = device.live_count();

    device.inject_fault(FaultPoint::Submit, 0);
    let result = uploader.upload_buffer(
        &device,
        &pattern(128, 1),
        vk::BufferUsageFlags::INDEX_BUFFER,
        "doomed",
    );
    assert!(result.is_err());
    assert_eq!(device.live_count(), baseline);

    device.inject_fault(FaultPoint::CreateBuffer, 1);
    assert!(uploader
        .upload_buffer(&device, &pattern(16, 2), vk::BufferUsageFlags::VERTEX_BUFFER, "doomed")
        .is_err());
    assert_eq!(device.live_count(), baseline);

    uploader.destroy(&device);
    device.assert_clean();
}

#[test]
fn mesh_without_indices_has_no_index_buffer() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();

    let vertices = [Vertex::default(); 4];
    let plain = uploader.upload_mesh(&device, &vertices, &[], "plain").unwrap();
    assert!(!plain.is_indexed());
    assert_eq!(plain.vertex_count(), 4);

    let indexed = uploader
        .upload_mesh(&device, &vertices, &[0, 1, 2, 2, 3, 0], "quad")
        .unwrap();
    assert!(indexed.is_indexed());
    assert_eq!(indexed.index_count(), 6);
    let index_bytes = device
        .buffer_contents(indexed.index_buffer().unwrap().handle())
        .unwrap();
    assert_eq!(index_bytes.len(), 24);
    assert_eq!(&index_bytes[4..8], &1_u32.to_ne_bytes());

    plain.destroy(&device);
    indexed.destroy(&device);
    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn padded_texture_rows_are_packed_on_upload() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();

    // 3x2 RGBA with 4 bytes of padding per row.
    let region = PixelRegion {
        width: 3,
        height: 2,
        pitch: 16,
        texel_size: 4,
    };
    let mut pixels = vec![0xee_u8; 32];
    pixels[..12].copy_from_slice(&pattern(12, 1));
    pixels[16..28].copy_from_slice(&pattern(12, 100));

    let texture = uploader
        .upload_texture(&device, &pixels, region, vk::Format::R8G8B8A8_SRGB, "padded")
        .unwrap();
    assert_eq!((texture.width(), texture.height()), (3, 2));

    let contents = device.image_contents(texture.image().handle()).unwrap();
    assert_eq!(&contents[..12], &pattern(12, 1)[..]);
    assert_eq!(&contents[12..], &pattern(12, 100)[..]);
    assert_eq!(
        device.image_layout(texture.image().handle()),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );

    texture.destroy(&device);
    uploader.destroy(&device);
    device.assert_clean();
}

#[test]
fn texture_upload_rejects_bad_sources() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let baseline = device.live_count();

    let unsupported = uploader.upload_texture(
        &device,
        &[0; 16],
        PixelRegion::packed(2, 2, 4),
        vk::Format::BC1_RGB_UNORM_BLOCK,
        "bc1",
    );
    assert!(matches!(unsupported, Err(GpuError::UnsupportedFormat(_))));

    let short = uploader.upload_texture(
        &device,
        &[0; 15],
        PixelRegion::packed(2, 2, 4),
        vk::Format::R8G8B8A8_UNORM,
        "short",
    );
    assert!(matches!(short, Err(GpuError::Upload(_))));

    let texel_mismatch = uploader.upload_texture(
        &device,
        &[0; 4],
        PixelRegion::packed(2, 2, 1),
        vk::Format::R8G8B8A8_UNORM,
        "mismatch",
    );
    assert!(texel_mismatch.is_err());

    assert_eq!(device.live_count(), baseline);
    uploader.destroy(&device);
    device.assert_clean();
}

#[test]
fn persistent_staging_waits_for_the_previous_copy() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let usage = vk::BufferUsageFlags::VERTEX_BUFFER;
    let first_dst = uploader.upload_buffer(&device, &[0; 256], usage, "a").unwrap();
    let second_dst = uploader.upload_buffer(&device, &[0; 256], usage, "b").unwrap();

    let mut streaming = StreamingUploader::new(&device).unwrap();
    let first = pattern(256, 3);
    let second = pattern(256, 200);

    streaming.stream_buffer(&device, &first_dst, 0, &first).unwrap();
    // The copy is queued but nothing has waited on it yet.
    assert_eq!(device.pending_submissions(), 1);
    assert_eq!(device.buffer_contents(first_dst.handle()).unwrap(), vec![0; 256]);

    device.clear_ops();
    streaming.stream_buffer(&device, &second_dst, 0, &second).unwrap();
    let ops = device.ops();
    let waited = ops
        .iter()
        .position(|op| matches!(op, Op::WaitFence(_)))
        .unwrap();
    let rewritten = ops
        .iter()
        .position(|op| matches!(op, Op::WriteBuffer { .. }))
        .unwrap();
    assert!(waited < rewritten);
    assert!(!ops.iter().any(Op::is_full_wait));

    streaming.flush(&device).unwrap();
    assert!(streaming.is_idle(&device).unwrap());
    assert_eq!(streaming.submissions(), 2);
    assert_eq!(
        content_hash(&device.buffer_contents(first_dst.handle()).unwrap()),
        content_hash(&first)
    );
    assert_eq!(
        content_hash(&device.buffer_contents(second_dst.handle()).unwrap()),
        content_hash(&second)
    );
    device.assert_clean();

    streaming.destroy(&device).unwrap();
    device.destroy_buffer(first_dst);
    device.destroy_buffer(second_dst);
    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn streaming_into_the_same_buffer_keeps_the_latest_contents() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let dst = uploader
        .upload_buffer(&device, &[0; 64], vk::BufferUsageFlags::UNIFORM_BUFFER, "ubo")
        .unwrap();
    let mut streaming = StreamingUploader::new(&device).unwrap();

    for seed in 0..4 {
        streaming.stream_buffer(&device, &dst, 0, &pattern(64, seed)).unwrap();
    }
    streaming.flush(&device).unwrap();
    assert_eq!(device.buffer_contents(dst.handle()).unwrap(), pattern(64, 3));

    // Partial update at an offset.
    streaming.stream_buffer(&device, &dst, 32, &[9; 32]).unwrap();
    streaming.flush(&device).unwrap();
    let contents = device.buffer_contents(dst.handle()).unwrap();
    assert_eq!(&contents[..32], &pattern(64, 3)[..32]);
    assert_eq!(&contents[32..], &[9; 32]);

    assert!(matches!(
        streaming.stream_buffer(&device, &dst, 60, &[0; 8]),
        Err(GpuError::Upload(_))
    ));

    streaming.destroy(&device).unwrap();
    device.destroy_buffer(dst);
    uploader.destroy(&device);
    device.assert_clean();
}

#[test]
fn staging_grows_only_after_the_previous_copy() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let dst = uploader
        .upload_buffer(&device, &[0; 512], vk::BufferUsageFlags::VERTEX_BUFFER, "grow")
        .unwrap();
    let mut streaming = StreamingUploader::new(&device).unwrap();

    streaming.stream_buffer(&device, &dst, 0, &[1; 16]).unwrap();
    assert_eq!(streaming.capacity(), 16);
    streaming.stream_buffer(&device, &dst, 0, &pattern(300, 5)).unwrap();
    assert_eq!(streaming.capacity(), 512);
    streaming.flush(&device).unwrap();
    assert_eq!(&device.buffer_contents(dst.handle()).unwrap()[..300], &pattern(300, 5)[..]);

    // Growing destroyed the first staging buffer while nothing used it.
    device.assert_clean();

    streaming.destroy(&device).unwrap();
    device.destroy_buffer(dst);
    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
}

#[test]
fn streamed_texture_is_refreshed_in_place() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let format = vk::Format::R8G8B8A8_UNORM;
    let region = packed_region(2, 2, format).unwrap();
    let texture = uploader
        .upload_texture(&device, &pattern(16, 0), region, format, "video")
        .unwrap();
    let mut streaming = StreamingUploader::new(&device).unwrap();

    streaming
        .stream_texture(&device, &texture, &pattern(16, 42), region)
        .unwrap();
    streaming.flush(&device).unwrap();
    assert_eq!(
        device.image_contents(texture.image().handle()).unwrap(),
        pattern(16, 42)
    );
    assert_eq!(
        device.image_layout(texture.image().handle()),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );

    let wrong_size = packed_region(4, 1, format).unwrap();
    assert!(streaming
        .stream_texture(&device, &texture, &pattern(16, 1), wrong_size)
        .is_err());

    streaming.destroy(&device).unwrap();
    texture.destroy(&device);
    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn rejected_stream_submit_does_not_strand_the_fence() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let dst = uploader
        .upload_buffer(&device, &[0; 64], vk::BufferUsageFlags::VERTEX_BUFFER, "dst")
        .unwrap();
    let mut streaming = StreamingUploader::new(&device).unwrap();

    device.inject_fault(FaultPoint::Submit, 0);
    assert!(matches!(
        streaming.stream_buffer(&device, &dst, 0, &[1; 64]),
        Err(GpuError::Vulkan(_))
    ));
    assert_eq!(streaming.submissions(), 0);
    assert!(streaming.is_idle(&device).unwrap());
    streaming.flush(&device).unwrap();

    // The path stays usable after the failure.
    streaming.stream_buffer(&device, &dst, 0, &[2; 64]).unwrap();
    streaming.flush(&device).unwrap();
    assert_eq!(device.buffer_contents(dst.handle()).unwrap(), vec![2; 64]);

    device.inject_fault(FaultPoint::Submit, 0);
    assert!(streaming.stream_buffer(&device, &dst, 0, &[3; 64]).is_err());
    streaming.destroy(&device).unwrap();
    device.destroy_buffer(dst);
    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn stream_offset_past_the_end_is_rejected() {
    let device = MockDevice::new(64, 64);
    let uploader = Uploader::new(&device).unwrap();
    let dst = uploader
        .upload_buffer(&device, &[0; 16], vk::BufferUsageFlags::VERTEX_BUFFER, "dst")
        .unwrap();
    let mut streaming = StreamingUploader::new(&device).unwrap();

    for offset in [u64::MAX, u64::MAX - 2, 16] {
        assert!(matches!(
            streaming.stream_buffer(&device, &dst, offset, &[1; 4]),
            Err(GpuError::Upload(_))
        ));
    }
    assert_eq!(streaming.submissions(), 0);
    assert_eq!(streaming.capacity(), 0);

    streaming.destroy(&device).unwrap();
    device.destroy_buffer(dst);
    uploader.destroy(&device);
    device.assert_clean();
}
