#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use mailet_common::{Mail, MailAddress, MailId, now_ms};
use mailet_spool::{
    FileRepository, MemoryRepository, Repository, RepositoryConfig, Spool, transfer,
};

#[test]
fn test_path_validation_rejects_parent_dir() {
    let result = FileRepository::builder()
        .path(PathBuf::from("/var/spool/../etc/passwd"))
        .build();

    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("contains a '..' component")
    );
}

#[test]
fn test_path_validation_rejects_relative_paths() {
    let result = FileRepository::builder()
        .path(PathBuf::from("relative/path"))
        .build();

    assert!(result.unwrap_err().to_string().contains("must be absolute"));
}

#[test]
#[cfg(unix)]
fn test_path_validation_rejects_unix_system_directories() {
    for path in ["/etc/spool", "/bin/messages", "/usr/sbin/mail", "/proc/mail", "/dev/spool"] {
        let result = FileRepository::builder().path(PathBuf::from(path)).build();

        assert!(
            result.unwrap_err().to_string().contains("system directory"),
            "Path {path} should be rejected"
        );
    }
}

fn mail(state: &str) -> Mail {
    let rcpt: MailAddress = "alice@local.test".parse().unwrap();
    Mail::new(Some("bob@remote.test".parse().unwrap()), [rcpt], state, 4)
}

#[tokio::test]
async fn test_transfer_between_backends() {
    let dir = tempfile::tempdir().unwrap();
    let file = FileRepository::builder()
        .path(dir.path().join("errors"))
        .build()
        .unwrap();
    file.init().unwrap();
    let memory = MemoryRepository::new();

    let mail = mail("root");
    memory.store(&mail, Arc::from(b"data".as_slice())).await.unwrap();

    transfer(&memory, &file, &mail).await.unwrap();

    assert!(memory.is_empty().await.unwrap());
    assert_eq!(file.retrieve(&mail.id()).await.unwrap(), mail);
    assert_eq!(&*file.content(&mail.id()).await.unwrap(), b"data");
}

#[tokio::test]
async fn test_file_spool_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config: RepositoryConfig =
        ron::from_str(&format!("File((path: {:?}))", dir.path().join("spool"))).unwrap();

    let mail = mail("transport");
    {
        let spool = Spool::new(config.clone().into_repository().unwrap(), Duration::from_secs(60));
        spool.submit(&mail, Arc::from(b"data".as_slice())).await.unwrap();

        // Leased at the time of the crash
        let (_lease, _) = spool.dequeue(now_ms()).await.unwrap().unwrap();
    }

    let spool = Spool::new(config.into_repository().unwrap(), Duration::from_secs(60));
    let (lease, recovered) = spool.dequeue(now_ms()).await.unwrap().unwrap();

    assert_eq!(recovered, mail);
    spool.complete(lease).await.unwrap();
    assert_eq!(spool.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_dequeue_hands_out_each_mail_once() {
    let spool = Arc::new(Spool::new(
        Arc::new(MemoryRepository::new()),
        Duration::from_secs(60),
    ));

    for _ in 0..20 {
        spool.submit(&mail("root"), Arc::from(Vec::new())).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let spool = Arc::clone(&spool);
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some((lease, mail)) = spool.dequeue(now_ms()).await.unwrap() {
                seen.push(mail.id());
                spool.complete(lease).await.unwrap();
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort_unstable();
    all.dedup();

    assert_eq!(all.len(), 20);
    assert_eq!(spool.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_undecodable_record_does_not_block_the_spool() {
    let dir = tempfile::tempdir().unwrap();
    let file = FileRepository::builder()
        .path(dir.path().join("spool"))
        .build()
        .unwrap();
    file.init().unwrap();

    let corrupt: MailId = "01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
    let record = file.path().join(format!("{corrupt}.bin"));
    std::fs::write(record, [0xff, 0xff, 0xff]).unwrap();

    let spool = Spool::new(Arc::new(file), Duration::from_secs(60));
    let good = mail("root");
    spool
        .submit(&good, Arc::from(b"data".as_slice()))
        .await
        .unwrap();

    let (lease, dequeued) = spool.dequeue(now_ms()).await.unwrap().unwrap();
    assert_eq!(dequeued.id(), good.id());
    assert_eq!(spool.unreadable(), vec![corrupt]);

    spool.complete(lease).await.unwrap();
    assert!(spool.dequeue(now_ms()).await.unwrap().is_none());
    assert_eq!(spool.len().await.unwrap(), 1);
}
