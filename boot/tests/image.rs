// Image testing.

use std::cell::RefCell;

use asraw::AsRaw;
use boot::{
    boot_decision, check_checksum, check_configuration, check_identity, crc::crc16, BootDecision,
    BootFailure, ChecksumError, ConfigError, Domain, DomainTable, Event, ExpectedIdentity,
    FlashState, IdentityError, Image, ImageHeader, ProgrammingSession, SessionConfig,
    SessionError,
};
use mkimage::ImageBuilder;
use simflash::{gen::GenBuilder, styles, SimFlash};
use test_case::test_case;

/// Stream `data` into domain 0 in pieces of the given sizes, repeating the
/// last size until the data runs out.
fn program<F: storage::FlashDriver>(flash: F, domains: &[Domain], data: &[u8], chunks: &[usize]) -> F {
    let table = DomainTable::new(domains).unwrap();
    let mut session: ProgrammingSession<'_, F, Vec<Event>, 2048> =
        ProgrammingSession::new(flash, Vec::new(), table, SessionConfig::new()).unwrap();
    session.flash_init(0).unwrap();

    let mut rest = data;
    let mut sizes = chunks.iter().copied().chain(std::iter::repeat(chunks[chunks.len() - 1]));
    while !rest.is_empty() {
        let size = sizes.next().unwrap().min(rest.len());
        let (now, later) = rest.split_at(size);
        session.write(now, true).unwrap();
        rest = later;
    }
    session.wait_end().unwrap();
    assert_eq!(session.flash_state(), FlashState::End);

    let (flash, events) = session.release();
    assert!(events.iter().all(|e| !e.is_failure()));
    flash
}

#[test]
fn image_test() {
    for flash in styles::all_flashes() {
        let (layout, flash) = flash.unwrap();
        let domains = [Domain::new(layout.base(), 0x8000, 256)];

        let img = GenBuilder::default().size(0x6000).seed(7).build().unwrap();
        let flash = RefCell::new(program(flash, &domains, &img.data, &[333, 1000, 17]));

        // Validate that this is a good image.
        let image = Image::from_flash(&flash, &domains[0]).unwrap();
        image.check_checksum().unwrap();
        assert_eq!(image.header.application_size, 0x6000);
        assert_eq!(image.header.crc, img.crc);
        assert_eq!(image.payload_start(), layout.base() + 256);
        println!("{}: {:x?}", layout.name, image.header);
    }
}

#[test_case(&[30, 50, 20] ; "uneven")]
#[test_case(&[116] ; "single")]
#[test_case(&[1] ; "bytewise")]
#[test_case(&[7, 64] ; "odd start")]
fn build_program_validate(chunks: &[usize]) {
    let binary: Vec<u8> = (0..100u32).map(|i| (i * 7 + 3) as u8).collect();
    let file = ImageBuilder::new(16).build(&binary).unwrap();
    assert_eq!(file.data.len(), 116);
    assert_eq!(&file.data[0..4], &100u32.to_ne_bytes());
    assert_eq!(file.header.crc, crc16(&binary, 0, 100));

    // The header goes first, then the payload in the given chunks.
    let domains = [Domain::new(0, 0x2000, 16)];
    let flash: SimFlash = styles::K64.build().unwrap();
    let flash = program(flash, &domains, &file.data, chunks);
    let flash = RefCell::new(flash);

    check_checksum(&flash, &domains[0]).unwrap();
    let table = DomainTable::new(&domains).unwrap();
    assert_eq!(boot_decision(&flash, &table, None), BootDecision::Boot);
}

#[test]
fn corruption_is_detected() {
    let binary = [0x5au8; 100];
    let file = ImageBuilder::new(16).build(&binary).unwrap();
    let domains = [Domain::new(0, 0x2000, 16)];
    let flash: SimFlash = styles::K64.build().unwrap();
    let flash = program(flash, &domains, &file.data, &[30, 50, 20]);

    for byte in [0, 57, 99] {
        let mut bad: SimFlash = SimFlash::new(styles::K64.sectors, 8).unwrap();
        bad.install(flash.bytes_at(0, 116).unwrap(), 0).unwrap();
        bad.corrupt(16, byte).unwrap();
        let bad = RefCell::new(bad);

        assert!(matches!(
            check_checksum(&bad, &domains[0]),
            Err(ChecksumError::Mismatch { stored, .. }) if stored == file.header.crc
        ));
        let table = DomainTable::new(&domains).unwrap();
        match boot_decision(&bad, &table, None) {
            BootDecision::StayInBootloader {
                domain: 0,
                reason: BootFailure::Checksum(ChecksumError::Mismatch { .. }),
            } => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn write_after_end_is_rejected() {
    let domains = [Domain::new(0, 0x2000, 16)];
    let table = DomainTable::new(&domains).unwrap();
    let flash: SimFlash = styles::K64.build().unwrap();
    let mut session: ProgrammingSession<'_, _, (), 64> =
        ProgrammingSession::new(flash, (), table, SessionConfig::new()).unwrap();
    session.flash_init(0).unwrap();
    session.write(&[1; 12], false).unwrap();
    session.wait_end().unwrap();

    let before = (session.next_flash(), session.next_erase(), session.pending());
    assert_eq!(
        session.write(&[2; 12], true),
        Err(SessionError::WrongState(FlashState::End))
    );
    assert_eq!(
        (session.next_flash(), session.next_erase(), session.pending()),
        before
    );
}

fn install_header(flash: &mut SimFlash, address: u32, application_size: u32, crc: u16) {
    let header = ImageHeader {
        application_size,
        crc,
        ..ImageHeader::blank()
    };
    flash.install(header.as_raw(), address).unwrap();
}

#[test]
fn all_domains_must_pass() {
    let domains = [Domain::new(0, 0x2000, 16), Domain::new(0x2000, 0x1000, 16)];
    let table = DomainTable::new(&domains).unwrap();

    let file = ImageBuilder::new(16).build(&[9; 300]).unwrap();
    let mut flash: SimFlash = styles::K64.build().unwrap();
    flash.install(&file.data, 0).unwrap();
    install_header(&mut flash, 0x2000, 0x1000, 0x1234);
    let flash = RefCell::new(flash);

    check_checksum(&flash, &domains[0]).unwrap();
    assert_eq!(
        boot_decision(&flash, &table, None),
        BootDecision::StayInBootloader {
            domain: 1,
            reason: BootFailure::Checksum(ChecksumError::Config(ConfigError::TooLarge {
                size: 0x1000,
                capacity: 0x1000 - 16
            }))
        }
    );
}

#[test]
fn configuration_states() {
    let domains = [
        Domain::new(0, 0x1000, 16),
        Domain::new(0x1000, 0x1000, 16),
        Domain::new(0x2000, 0x1000, 16),
        Domain::new(0x3000, 0x1000, 4),
    ];
    let mut flash: SimFlash = styles::K64.build().unwrap();
    install_header(&mut flash, 0x1000, 0, 0x1234);
    install_header(&mut flash, 0x2000, 10, 0);
    let flash = RefCell::new(flash);

    // Blank flash is not the same as a broken header.
    assert_eq!(
        check_configuration(&flash, &domains[0]),
        Err(ConfigError::NoImage)
    );
    assert_eq!(
        check_configuration(&flash, &domains[1]),
        Err(ConfigError::NotConfigured)
    );
    assert_eq!(
        check_checksum(&flash, &domains[2]),
        Err(ChecksumError::Config(ConfigError::NotConfigured))
    );
    assert_eq!(
        check_configuration(&flash, &domains[3]),
        Err(ConfigError::HeaderTooSmall { size: 4 })
    );
}

#[test]
fn identity() {
    let domains = [Domain::new(0, 0x4000, 256)];
    let table = DomainTable::new(&domains).unwrap();
    let img = GenBuilder::default()
        .size(5000)
        .identity(0x319, 0x77)
        .build()
        .unwrap();
    let mut flash: SimFlash = styles::K64.build().unwrap();
    flash.install(&img.data, 0).unwrap();
    let flash = RefCell::new(flash);

    check_identity(&flash, &domains[0], 0x319, 0x77).unwrap();
    assert_eq!(
        check_identity(&flash, &domains[0], 0x319, 0x78),
        Err(IdentityError::Product {
            expected: 0x78,
            found: 0x77
        })
    );

    let expected = ExpectedIdentity {
        vendor_id: 0x320,
        product_code: 0x77,
    };
    assert_eq!(
        boot_decision(&flash, &table, Some(expected)),
        BootDecision::StayInBootloader {
            domain: 0,
            reason: BootFailure::Identity(IdentityError::Vendor {
                expected: 0x320,
                found: 0x319
            })
        }
    );
    let expected = ExpectedIdentity {
        vendor_id: 0x319,
        product_code: 0x77,
    };
    assert!(boot_decision(&flash, &table, Some(expected)).is_boot());
}
