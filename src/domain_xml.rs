use uuid::Uuid;

use crate::machine::{MachineSpec, NetworkMode};

/// Generate the libvirt domain XML for a machine spec. The UUID is freshly
/// generated per call; everything else comes from the machine spec.
pub fn render(spec: &MachineSpec) -> String {
    let name = &spec.name;
    let uuid = Uuid::new_v4();
    let memory = spec.memory;
    let vcpu = spec.vcpu;
    let disk = spec.disk_path.display();
    let iso = spec.iso_path.display();
    let osid = spec.distro.os_variant_id;
    let interface = interface_clause(spec);

    format!(
        r#"<domain type='kvm'>
  <name>{name}</name>
  <uuid>{uuid}</uuid>
  <metadata>
    <libosinfo:libosinfo xmlns:libosinfo="http://libosinfo.org/xmlns/libvirt/domain/1.0">
      <libosinfo:os id="{osid}"/>
    </libosinfo:libosinfo>
  </metadata>
  <memory unit='KiB'>{memory}</memory>
  <currentMemory unit='KiB'>{memory}</currentMemory>
  <vcpu>{vcpu}</vcpu>
  <os>
    <type arch='x86_64' machine='q35'>hvm</type>
    <boot dev='hd'/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <cpu mode='host-model'/>
  <clock offset='utc'>
    <timer name='rtc' tickpolicy='catchup'/>
    <timer name='pit' tickpolicy='delay'/>
    <timer name='hpet' present='no'/>
  </clock>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <source file='{iso}'/>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
{interface}
    <console type='pty'>
      <target type='serial'/>
    </console>
    <channel type='unix'>
      <source mode='bind'/>
      <target type='virtio' name='org.qemu.guest_agent.0'/>
    </channel>
    <rng model='virtio'>
      <backend model='random'>/dev/urandom</backend>
    </rng>
  </devices>
</domain>
"#
    )
}

fn interface_clause(spec: &MachineSpec) -> String {
    let mac = &spec.mac_address;
    match &spec.network {
        NetworkMode::Static { bridge, .. } => format!(
            r#"    <interface type='bridge'>
      <mac address='{mac}'/>
      <source bridge='{bridge}'/>
      <model type='virtio'/>
    </interface>"#
        ),
        NetworkMode::Dhcp => format!(
            r#"    <interface type='network'>
      <mac address='{mac}'/>
      <source network='default'/>
      <model type='virtio'/>
    </interface>"#
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_effective_config;
    use crate::distro;
    use crate::machine::MachineSpec;
    use crate::machine::tests::test_machine_spec;

    #[test]
    fn xml_contains_identity_and_resources() {
        let spec = test_machine_spec("web01");
        let xml = render(&spec);
        assert!(xml.contains("<name>web01</name>"));
        assert!(xml.contains("<memory unit='KiB'>1048576</memory>"));
        assert!(xml.contains("<vcpu>1</vcpu>"));
        assert!(xml.contains("<uuid>"));
    }

    #[test]
    fn xml_contains_storage_paths() {
        let spec = test_machine_spec("web01");
        let xml = render(&spec);
        assert!(xml.contains("<source file='/var/lib/libvirt/images/web01.img'/>"));
        assert!(xml.contains("<source file='/var/lib/libvirt/iso/web01.iso'/>"));
    }

    #[test]
    fn xml_carries_os_variant_id() {
        let spec = test_machine_spec("web01");
        let xml = render(&spec);
        assert!(xml.contains(r#"<libosinfo:os id="http://ubuntu.com/ubuntu/24.04"/>"#));
    }

    #[test]
    fn dhcp_mode_uses_default_network() {
        let spec = test_machine_spec("web01");
        let xml = render(&spec);
        assert!(xml.contains("<interface type='network'>"));
        assert!(xml.contains("<source network='default'/>"));
        assert!(xml.contains(&format!("<mac address='{}'/>", spec.mac_address)));
    }

    #[test]
    fn static_mode_uses_bridge() {
        let distro = distro::lookup("ubuntu", None).unwrap();
        let mut config = test_effective_config();
        config.bridge = Some("br0".into());
        config.address = Some("10.0.0.5".into());
        let spec = MachineSpec::new("web01", distro, &config).unwrap();
        let xml = render(&spec);
        assert!(xml.contains("<interface type='bridge'>"));
        assert!(xml.contains("<source bridge='br0'/>"));
        assert!(xml.contains(&format!("<mac address='{}'/>", spec.mac_address)));
        assert!(!xml.contains("<source network='default'/>"));
    }

    #[test]
    fn guest_agent_and_entropy_devices_present() {
        let spec = test_machine_spec("web01");
        let xml = render(&spec);
        assert!(xml.contains("org.qemu.guest_agent.0"));
        assert!(xml.contains("<rng model='virtio'>"));
    }

    #[test]
    fn uuid_is_fresh_per_render() {
        let spec = test_machine_spec("web01");
        let a = render(&spec);
        let b = render(&spec);
        let uuid_of = |xml: &str| {
            xml.split("<uuid>").nth(1).unwrap().split("</uuid>").next().unwrap().to_string()
        };
        assert_ne!(uuid_of(&a), uuid_of(&b));
    }
}
