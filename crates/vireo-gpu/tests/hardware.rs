use ash::vk;
use vireo_gpu::GpuCapabilities;

#[test]
#[ignore = "Requires GPU hardware"]
fn every_device_reports_a_summary() {
    // SAFETY: loading the system Vulkan library has no preconditions.
    let entry = unsafe { ash::Entry::load() }.unwrap();
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"vireo-hardware-test")
        .api_version(vk::API_VERSION_1_1);
    let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
    // SAFETY: the create info only references locals that outlive the call.
    let instance = unsafe { entry.create_instance(&create_info, None) }.unwrap();

    // SAFETY: the instance is valid until destroyed below.
    let devices = unsafe { instance.enumerate_physical_devices() }.unwrap();
    assert!(!devices.is_empty(), "no Vulkan device");
    for device in devices {
        // SAFETY: the handle was just enumerated from this instance.
        let caps = unsafe { GpuCapabilities::query(&instance, device) };
        let summary = caps.summary();
        assert!(summary.contains(&caps.device_name), "{summary}");
        assert!(caps.max_push_constants_size >= 128);
    }

    // SAFETY: nothing created from the instance is still alive.
    unsafe { instance.destroy_instance(None) };
}
