// Download testing.

use std::cell::RefCell;

use boot::{
    boot_decision,
    download::{DomainDownload, DownloadError},
    BootDecision, Domain, DomainTable, ErasePolicy, Event, ProgrammingSession, SessionConfig,
    SessionError, UserState,
};
use simflash::{gen::GenBuilder, styles, SimFlash, INJECTED_FAILURE};
use storage::WordAddressed;

static F2838X_DOMAINS: [Domain; 2] = [
    Domain::new(0x8_2000, 0x6000, 16),
    Domain::new(0x8_8000, 0x10000, 16),
];

type WordSession = ProgrammingSession<'static, SimFlash<WordAddressed>, Vec<Event>, 256>;

fn word_session(config: SessionConfig) -> WordSession {
    let flash: SimFlash<WordAddressed> = styles::F2838X.build().unwrap();
    let table = DomainTable::new(&F2838X_DOMAINS).unwrap();
    ProgrammingSession::new(flash, Vec::new(), table, config).unwrap()
}

/// Feed `data` in 7 byte segments, as an SDO server would.
fn send<const S: usize>(
    download: &mut DomainDownload<S>,
    session: &mut WordSession,
    data: &[u8],
) -> Result<(), DownloadError> {
    let count = data.chunks(7).count();
    for (i, segment) in data.chunks(7).enumerate() {
        download.segment(session, segment, i + 1 == count)?;
    }
    Ok(())
}

#[test]
fn word_mode_update() {
    let mut session = word_session(SessionConfig::new());
    let mut download = DomainDownload::<64>::new();

    for (domain, seed) in [(0, 11), (1, 12)] {
        let img = GenBuilder::default()
            .words(true)
            .header_size(16)
            .size(9_998)
            .seed(seed)
            .build()
            .unwrap();
        download.start(&mut session, domain, img.data.len()).unwrap();
        send(&mut download, &mut session, &img.data).unwrap();
        assert!(!download.is_active());
        assert_eq!(download.received(), img.data.len());
    }

    let (flash, events) = session.release();
    assert!(events.iter().all(|e| !e.is_failure()));
    let flash = RefCell::new(flash);
    let table = DomainTable::new(&F2838X_DOMAINS).unwrap();
    assert_eq!(boot_decision(&flash, &table, None), BootDecision::Boot);
}

#[test]
fn size_checks() {
    let mut session = word_session(SessionConfig::new());
    let mut download = DomainDownload::<64>::new();

    assert_eq!(
        download.segment(&mut session, &[0; 4], false),
        Err(DownloadError::NotStarted)
    );
    assert_eq!(
        download.start(&mut session, 0, 0xc001),
        Err(DownloadError::TooLarge {
            declared: 0xc001,
            capacity: 0xc000
        })
    );
    assert_eq!(
        download.start(&mut session, 2, 10),
        Err(DownloadError::Session(SessionError::Domain(
            boot::DomainError::Unknown(2)
        )))
    );

    download.start(&mut session, 0, 20).unwrap();
    download.segment(&mut session, &[0; 14], false).unwrap();
    assert_eq!(
        download.segment(&mut session, &[0; 8], true),
        Err(DownloadError::Overrun {
            declared: 20,
            received: 22
        })
    );
    assert!(!download.is_active());

    download.start(&mut session, 0, 20).unwrap();
    assert_eq!(
        download.segment(&mut session, &[0; 14], true),
        Err(DownloadError::SizeMismatch {
            declared: 20,
            received: 14
        })
    );

    // Odd totals cannot be written to a word addressed part.
    download.start(&mut session, 1, 7).unwrap();
    assert_eq!(
        download.segment(&mut session, &[0; 7], true),
        Err(DownloadError::Session(SessionError::Unaligned { size: 7, unit: 2 }))
    );
}

#[test]
fn staging_must_fit() {
    let mut session = word_session(SessionConfig::new());
    let mut odd = DomainDownload::<63>::new();
    assert_eq!(
        odd.start(&mut session, 0, 10),
        Err(DownloadError::Staging { size: 63 })
    );
    let mut large = DomainDownload::<256>::new();
    assert_eq!(
        large.start(&mut session, 0, 10),
        Err(DownloadError::Staging { size: 256 })
    );
}

#[test]
fn erase_before_download() {
    let mut session = word_session(SessionConfig::new().erase_policy(ErasePolicy::BeforeFlash));
    let img = GenBuilder::default()
        .words(true)
        .header_size(16)
        .size(4_000)
        .build()
        .unwrap();
    let mut download = DomainDownload::<128>::new();

    download.start(&mut session, 1, img.data.len()).unwrap();
    assert_eq!(
        send(&mut download, &mut session, &img.data),
        Err(DownloadError::Session(SessionError::NotErased))
    );

    session.erase(1, true).unwrap();
    assert!(session.is_domain_erased(1));
    download.start(&mut session, 1, img.data.len()).unwrap();
    send(&mut download, &mut session, &img.data).unwrap();
    assert!(!session.is_domain_erased(1));

    let erased = session.notifier().iter().filter(|e| e.code() == 0x1f).count();
    assert_eq!(erased, 1);
}

#[test]
fn flash_failure_cancels() {
    let mut session = word_session(SessionConfig::new());
    session.flash_mut().fail_program_at(Some(0x8_2008));
    let mut download = DomainDownload::<64>::new();

    download.start(&mut session, 0, 200).unwrap();
    assert_eq!(
        download.segment(&mut session, &[0x42; 70], false),
        Err(DownloadError::Session(SessionError::Flash {
            address: 0x8_2008,
            error: storage::Error::Hardware(INJECTED_FAILURE)
        }))
    );
    assert!(!download.is_active());
    assert_eq!(session.state(), UserState::Error);
    assert!(session.notifier().iter().any(|e| e.is_failure()));
    assert_eq!(
        download.segment(&mut session, &[0x42; 6], true),
        Err(DownloadError::NotStarted)
    );

    // A fresh start recovers the session.
    session.flash_mut().fail_program_at(None);
    download.start(&mut session, 0, 200).unwrap();
    assert_eq!(session.state(), UserState::Ok);
}
